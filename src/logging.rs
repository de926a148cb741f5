use crate::settings::InkSettings;
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

// Keeps the background writer alive for the life of the process.
static FILE_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Initialise logging. With `debug` enabled the default level is `debug` and
/// `RUST_LOG` may override it; otherwise `info` is forced.
///
/// When `file` is given, events are also appended to that file through a
/// non-blocking writer.
pub fn init(debug: bool, file: Option<PathBuf>) {
    let filter = build_filter(debug);

    let file_layer = file.and_then(|path| {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(name)
            .build(dir)
            .ok()?;
        let (writer, guard) = tracing_appender::non_blocking(appender);
        if let Ok(mut slot) = FILE_GUARD.lock() {
            *slot = Some(guard);
        }
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
}

/// Initialise logging from loaded settings, honouring `debug_logging`.
pub fn init_with_settings(settings: &InkSettings, file: Option<PathBuf>) {
    init(settings.debug_logging, file);
}

fn build_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::new("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_filter_ignores_debug_events() {
        let filter = build_filter(false);
        assert_eq!(filter.max_level_hint(), Some(tracing::level_filters::LevelFilter::INFO));
    }
}
