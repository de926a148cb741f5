use crate::ink::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_MEMORY_THRESHOLD};
use crate::ink::history::DEFAULT_MAX_STORED_ACTIONS;
use crate::ink::pagination::{PaperSize, DEFAULT_EXCLUSION_GAP};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InkSettings {
    /// Maximum number of notes kept in the stroke cache.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Estimated byte budget of the stroke cache.
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_bytes: u64,
    #[serde(default = "default_max_stored_actions")]
    pub max_stored_actions: usize,
    /// How long a redraw waits for an in-flight commit before giving up.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_erase_radius")]
    pub erase_radius: f32,
    #[serde(default = "default_dirty_padding")]
    pub dirty_padding: f32,
    #[serde(default = "default_pagination_enabled")]
    pub pagination_enabled: bool,
    #[serde(default)]
    pub paper_size: PaperSize,
    /// Height of the separator between two pages.
    #[serde(default = "default_exclusion_gap")]
    pub exclusion_gap: f32,
    #[serde(default = "default_min_zoom")]
    pub min_zoom: f32,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,
    #[serde(default)]
    pub debug_logging: bool,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_memory_threshold() -> u64 {
    DEFAULT_MEMORY_THRESHOLD
}

fn default_max_stored_actions() -> usize {
    DEFAULT_MAX_STORED_ACTIONS
}

fn default_wait_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_erase_radius() -> f32 {
    15.0
}

fn default_dirty_padding() -> f32 {
    20.0
}

fn default_pagination_enabled() -> bool {
    true
}

fn default_exclusion_gap() -> f32 {
    DEFAULT_EXCLUSION_GAP
}

fn default_min_zoom() -> f32 {
    1.0
}

fn default_max_zoom() -> f32 {
    2.0
}

impl Default for InkSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            memory_threshold_bytes: default_memory_threshold(),
            max_stored_actions: default_max_stored_actions(),
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            erase_radius: default_erase_radius(),
            dirty_padding: default_dirty_padding(),
            pagination_enabled: default_pagination_enabled(),
            paper_size: PaperSize::default(),
            exclusion_gap: default_exclusion_gap(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            debug_logging: false,
        }
    }
}

impl InkSettings {
    /// Reads settings from a JSON file. A missing or blank file yields defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading settings {}", path.display()))
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        if settings.sanitize() {
            tracing::warn!(path = %path.display(), "settings contained invalid values and were adjusted");
        }
        Ok(settings)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("serializing settings")?;
        std::fs::write(path, json).with_context(|| format!("writing settings {}", path.display()))?;
        Ok(())
    }

    /// Clamps values that would break the session. Returns `true` if anything changed.
    pub fn sanitize(&mut self) -> bool {
        let before = self.clone();
        self.max_entries = self.max_entries.max(1);
        self.max_stored_actions = self.max_stored_actions.max(1);
        self.poll_interval_ms = self.poll_interval_ms.max(1);
        if self.erase_radius.is_nan() || self.erase_radius <= 0.0 {
            self.erase_radius = default_erase_radius();
        }
        if self.dirty_padding.is_nan() || self.dirty_padding < 0.0 {
            self.dirty_padding = default_dirty_padding();
        }
        if self.exclusion_gap.is_nan() || self.exclusion_gap < 0.0 {
            self.exclusion_gap = default_exclusion_gap();
        }
        if self.min_zoom.is_nan() || self.min_zoom <= 0.0 {
            self.min_zoom = default_min_zoom();
        }
        if self.max_zoom.is_nan() || self.max_zoom <= 0.0 {
            self.max_zoom = default_max_zoom();
        }
        if self.min_zoom > self.max_zoom {
            std::mem::swap(&mut self.min_zoom, &mut self.max_zoom);
        }
        *self != before
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
