use crate::ink::coordinator::{CommitOutcome, DrawingCoordinator};
use crate::ink::input::{InputAction, InputRouter};
use crate::ink::messages::InkCommand;
use crate::ink::signals::InkSignal;
use anyhow::{anyhow, Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

enum Envelope {
    Command(InkCommand),
    Shutdown,
}

/// Count of submitted commands not yet finished by the worker.
#[derive(Default)]
struct PendingCommands {
    count: Mutex<usize>,
    idle: Condvar,
}

impl PendingCommands {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self, timeout: Duration) -> Result<(), usize> {
        let guard = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .idle
            .wait_timeout_while(guard, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard == 0 {
            Ok(())
        } else {
            Err(*guard)
        }
    }
}

/// Serial execution queue in front of a `DrawingCoordinator`.
///
/// All stroke, erase, undo/redo and page commands go through one worker
/// thread, so at most one mutation is ever in flight.
pub struct InkService {
    coordinator: Arc<DrawingCoordinator>,
    tx: Sender<Envelope>,
    pending: Arc<PendingCommands>,
    handle: Option<JoinHandle<()>>,
}

impl InkService {
    pub fn start(coordinator: Arc<DrawingCoordinator>, router: Option<InputRouter>) -> Result<Self> {
        let (tx, rx) = channel::<Envelope>();
        let pending = Arc::new(PendingCommands::default());
        let worker = Worker {
            coordinator: Arc::clone(&coordinator),
            router,
        };
        let worker_pending = Arc::clone(&pending);
        let handle = thread::Builder::new()
            .name("ink-service".to_string())
            .spawn(move || worker.run(rx, &worker_pending))
            .context("failed to spawn ink service thread")?;
        tracing::info!("ink service started");
        Ok(Self {
            coordinator,
            tx,
            pending,
            handle: Some(handle),
        })
    }

    pub fn coordinator(&self) -> &Arc<DrawingCoordinator> {
        &self.coordinator
    }

    pub fn submit(&self, command: InkCommand) -> Result<()> {
        self.pending.add();
        if self.tx.send(Envelope::Command(command)).is_err() {
            self.pending.finish();
            return Err(anyhow!("ink service is not running"));
        }
        Ok(())
    }

    /// Blocks until every submitted command has run. Returns `false` and logs
    /// if the queue is still busy after `timeout`.
    pub fn drain(&self, timeout: Duration) -> bool {
        match self.pending.wait_idle(timeout) {
            Ok(()) => true,
            Err(remaining) => {
                tracing::warn!(remaining, timeout_ms = timeout.as_millis() as u64, "ink queue did not drain in time");
                false
            }
        }
    }

    /// Stops the worker after the queued commands. Returns `false` if the
    /// worker did not exit cleanly within the join timeout.
    pub fn shutdown(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let _ = self.tx.send(Envelope::Shutdown);

        let (done_tx, done_rx) = channel();
        thread::spawn(move || {
            let _ = done_tx.send(handle.join());
        });
        match done_rx.recv_timeout(SHUTDOWN_JOIN_TIMEOUT) {
            Ok(Ok(())) => {
                tracing::info!("ink service stopped");
                true
            }
            Ok(Err(_)) => {
                tracing::error!("ink service thread panicked");
                false
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!("ink service thread join timed out");
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!("ink service join channel disconnected");
                false
            }
        }
    }
}

impl Drop for InkService {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    coordinator: Arc<DrawingCoordinator>,
    router: Option<InputRouter>,
}

impl Worker {
    fn run(mut self, rx: Receiver<Envelope>, pending: &PendingCommands) {
        for envelope in rx {
            let command = match envelope {
                Envelope::Command(command) => command,
                Envelope::Shutdown => break,
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.execute(command))) {
                let message = if let Some(message) = payload.downcast_ref::<&str>() {
                    (*message).to_string()
                } else if let Some(message) = payload.downcast_ref::<String>() {
                    message.clone()
                } else {
                    "unknown panic payload".to_string()
                };
                tracing::error!(panic = %message, "ink command panicked");
            }
            pending.finish();
        }
        if let Some(router) = self.router.as_mut() {
            router.close();
        }
    }

    fn execute(&mut self, command: InkCommand) {
        let coordinator = Arc::clone(&self.coordinator);
        match command {
            InkCommand::OpenNote(note_id) => {
                coordinator.open_note(&note_id);
                if let Some(router) = self.router.as_mut() {
                    if let Err(err) = coordinator.with_viewport(|v| router.open(note_id.as_str(), v)) {
                        tracing::error!(note_id = %note_id, ?err, "failed to open digitizer session");
                    }
                }
            }
            InkCommand::CloseNote => {
                if let Some(router) = self.router.as_mut() {
                    router.close();
                }
            }
            InkCommand::Input(event) => {
                let Some(router) = self.router.as_mut() else {
                    tracing::debug!("digitizer event without an input router");
                    return;
                };
                let action = coordinator.with_viewport(|v| router.handle(event, v));
                match action {
                    Some(InputAction::DrawingStarted) => coordinator.set_drawing(true),
                    Some(InputAction::CommitStroke(stroke)) => {
                        let note_id = stroke.note_id.clone();
                        self.mutate(&note_id, "commit_stroke", || coordinator.commit_stroke(stroke.clone()));
                        coordinator.set_drawing(false);
                    }
                    Some(InputAction::StrokeAbandoned) => coordinator.set_drawing(false),
                    Some(InputAction::Erase { note_id, path }) => {
                        self.mutate(&note_id, "erase", || coordinator.erase(&note_id, &path));
                    }
                    None => {}
                }
            }
            InkCommand::SetPenStyle(style) => {
                if let Some(router) = self.router.as_mut() {
                    router.set_style(style);
                }
            }
            InkCommand::CommitStroke(stroke) => {
                let note_id = stroke.note_id.clone();
                self.mutate(&note_id, "commit_stroke", || coordinator.commit_stroke(stroke.clone()));
            }
            InkCommand::Erase { note_id, path } => {
                self.mutate(&note_id, "erase", || coordinator.erase(&note_id, &path));
            }
            InkCommand::MoveStrokes {
                note_id,
                stroke_ids,
                dx,
                dy,
            } => {
                self.mutate(&note_id, "move_strokes", || {
                    coordinator.move_strokes(&note_id, &stroke_ids, dx, dy)
                });
            }
            InkCommand::InsertPage { note_id, page_number } => {
                self.mutate(&note_id, "insert_page", || coordinator.insert_page(&note_id, page_number));
                self.sync_exclusions();
            }
            InkCommand::Undo(note_id) => {
                self.mutate(&note_id, "undo", || coordinator.undo_step(&note_id));
                self.sync_exclusions();
            }
            InkCommand::Redo(note_id) => {
                self.mutate(&note_id, "redo", || coordinator.redo_step(&note_id));
                self.sync_exclusions();
            }
            InkCommand::Scroll { dx, dy } => {
                coordinator.update_viewport(|v| v.scroll(dx, dy));
                self.sync_exclusions();
            }
            InkCommand::Zoom {
                factor,
                focus_x,
                focus_y,
            } => {
                coordinator.update_viewport(|v| v.zoom(factor, focus_x, focus_y));
                self.sync_exclusions();
            }
            InkCommand::FlushPending => {
                coordinator.flush_pending();
            }
            InkCommand::TrimCache => {
                coordinator.trim_cache();
            }
        }
    }

    /// Runs a gated mutation. A `Busy` result is retried once after the gate
    /// frees; if it stays busy the command is dropped and reported.
    fn mutate<F>(&self, note_id: &str, command: &'static str, op: F) -> CommitOutcome
    where
        F: Fn() -> CommitOutcome,
    {
        let mut outcome = op();
        if outcome == CommitOutcome::Busy && self.coordinator.wait_for_idle() {
            tracing::debug!(note_id, command, "drawing gate freed, retrying");
            outcome = op();
        }
        match outcome {
            CommitOutcome::Busy => {
                tracing::error!(note_id, command, "ink command dropped, drawing gate stayed busy");
                self.coordinator.emit(InkSignal::CommandDropped {
                    note_id: note_id.to_string(),
                    command,
                });
            }
            CommitOutcome::NoOp => tracing::debug!(note_id, command, "ink command had no effect"),
            CommitOutcome::Committed { .. } => {}
        }
        outcome
    }

    fn sync_exclusions(&mut self) {
        if let Some(router) = self.router.as_mut() {
            self.coordinator.with_viewport(|v| router.sync_exclusions(v));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ink::input::{DigitizerDriver, DigitizerEvent, RawPoint};
    use crate::ink::model::fixtures::stroke_with_points;
    use crate::ink::model::Rect;
    use crate::ink::storage::MemoryNoteStore;
    use crate::ink::viewport::ViewportTransformer;
    use crate::settings::InkSettings;

    struct NullDriver;

    impl DigitizerDriver for NullDriver {
        fn open(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn set_enabled(&mut self, _enabled: bool) {}
        fn set_exclusion_zones(&mut self, _zones: &[Rect]) {}
    }

    fn coordinator() -> Arc<DrawingCoordinator> {
        Arc::new(DrawingCoordinator::new(
            Arc::new(MemoryNoteStore::new()),
            ViewportTransformer::new(800.0, 1000.0),
            InkSettings::default(),
        ))
    }

    #[test]
    fn commands_run_in_submission_order() {
        let service = InkService::start(coordinator(), None).unwrap();
        service.submit(InkCommand::OpenNote("n".into())).unwrap();
        service
            .submit(InkCommand::CommitStroke(stroke_with_points("a", "n", &[(1.0, 1.0), (5.0, 5.0)])))
            .unwrap();
        service
            .submit(InkCommand::CommitStroke(stroke_with_points("b", "n", &[(9.0, 9.0), (12.0, 12.0)])))
            .unwrap();
        service.submit(InkCommand::Undo("n".into())).unwrap();
        assert!(service.drain(Duration::from_secs(5)));

        let ids: Vec<String> = service.coordinator().strokes_for("n").iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["a".to_string()]);
        assert!(service.coordinator().can_redo("n"));
        assert!(service.shutdown());
    }

    #[test]
    fn digitizer_gesture_commits_through_router() {
        let router = InputRouter::new(Box::new(NullDriver));
        let service = InkService::start(coordinator(), Some(router)).unwrap();
        let signals = service.coordinator().subscribe();
        service.submit(InkCommand::OpenNote("n".into())).unwrap();
        service.submit(InkCommand::Input(DigitizerEvent::BeginStroke)).unwrap();
        service
            .submit(InkCommand::Input(DigitizerEvent::StrokeList(vec![
                RawPoint::at(10.0, 10.0),
                RawPoint::at(30.0, 40.0),
            ])))
            .unwrap();
        service.submit(InkCommand::Input(DigitizerEvent::EndStroke)).unwrap();
        assert!(service.drain(Duration::from_secs(5)));

        let strokes = service.coordinator().strokes_for("n");
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].point_count(), 2);
        let drawing: Vec<bool> = signals
            .try_iter()
            .filter_map(|signal| match signal {
                InkSignal::DrawingChanged(on) => Some(on),
                _ => None,
            })
            .collect();
        assert_eq!(drawing, vec![true, false]);
    }

    #[test]
    fn scroll_and_zoom_update_the_shared_viewport() {
        let service = InkService::start(coordinator(), None).unwrap();
        service.submit(InkCommand::Scroll { dx: 0.0, dy: 250.0 }).unwrap();
        service
            .submit(InkCommand::Zoom {
                factor: 2.0,
                focus_x: 0.0,
                focus_y: 0.0,
            })
            .unwrap();
        assert!(service.drain(Duration::from_secs(5)));
        let (scroll_y, zoom) = service
            .coordinator()
            .with_viewport(|v| (v.scroll_y(), v.zoom_scale()));
        assert_eq!(scroll_y, 250.0);
        assert_eq!(zoom, 2.0);
    }

    fn quick_timeout_coordinator() -> Arc<DrawingCoordinator> {
        let settings = InkSettings {
            wait_timeout_ms: 50,
            poll_interval_ms: 1,
            ..InkSettings::default()
        };
        Arc::new(DrawingCoordinator::new(
            Arc::new(MemoryNoteStore::new()),
            ViewportTransformer::new(800.0, 1000.0),
            settings,
        ))
    }

    #[test]
    fn busy_commit_is_retried_after_the_gate_frees() {
        let coordinator = quick_timeout_coordinator();
        coordinator.open_note("n");
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let holder = Arc::clone(&coordinator);
        let handle = thread::spawn(move || {
            let _guard = holder.gate().try_acquire().unwrap();
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(80));
        });
        held_rx.recv().unwrap();

        let service = InkService::start(Arc::clone(&coordinator), None).unwrap();
        service
            .submit(InkCommand::CommitStroke(stroke_with_points("a", "n", &[(1.0, 1.0), (5.0, 5.0)])))
            .unwrap();
        assert!(service.drain(Duration::from_secs(5)));
        handle.join().unwrap();

        let ids: Vec<String> = coordinator.strokes_for("n").iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn command_dropped_when_gate_stays_busy_is_reported() {
        let coordinator = quick_timeout_coordinator();
        coordinator.open_note("n");
        let signals = coordinator.subscribe();
        let service = InkService::start(Arc::clone(&coordinator), None).unwrap();

        {
            let _held = coordinator.gate().try_acquire().unwrap();
            service
                .submit(InkCommand::CommitStroke(stroke_with_points("a", "n", &[(1.0, 1.0), (5.0, 5.0)])))
                .unwrap();
            assert!(service.drain(Duration::from_secs(5)));
        }

        assert!(coordinator.strokes_for("n").is_empty());
        let dropped: Vec<InkSignal> = signals
            .try_iter()
            .filter(|signal| matches!(signal, InkSignal::CommandDropped { .. }))
            .collect();
        assert_eq!(
            dropped,
            vec![InkSignal::CommandDropped {
                note_id: "n".into(),
                command: "commit_stroke",
            }]
        );
    }

    #[test]
    fn drain_on_idle_queue_returns_immediately() {
        let service = InkService::start(coordinator(), None).unwrap();
        assert!(service.drain(Duration::from_millis(10)));
    }
}
