use crate::ink::cache::{CacheStats, StrokeCache, StrokeList};
use crate::ink::eraser::{dirty_rect, find_strokes_to_erase};
use crate::ink::gate::DrawingGate;
use crate::ink::history::{
    ActionPayload, Durability, HistoryAction, HistoryLog, HistoryState, InsertPagePayload, MovePayload,
    StrokeEdit, StrokePayload,
};
use crate::ink::memory::MemoryMonitor;
use crate::ink::model::{Rect, Stroke};
use crate::ink::render::{render_frame, RenderSurface};
use crate::ink::signals::{InkSignal, SignalHub};
use crate::ink::storage::{NoteStore, StorageError};
use crate::ink::viewport::ViewportTransformer;
use crate::settings::InkSettings;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Result of a mutating session operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommitOutcome {
    Committed {
        sequence: u64,
        durability: Durability,
        dirty: Option<Rect>,
    },
    /// Nothing to do: empty stroke, no erase hit, unknown ids or page.
    NoOp,
    /// Another commit held the gate past the wait timeout.
    Busy,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// A stroke write that did not reach storage and waits for `flush_pending`.
#[derive(Debug, Clone)]
enum PendingWrite {
    Insert { note_id: String, strokes: Vec<Stroke> },
    Delete { note_id: String, stroke_ids: Vec<String> },
}

impl PendingWrite {
    fn note_id(&self) -> &str {
        match self {
            Self::Insert { note_id, .. } | Self::Delete { note_id, .. } => note_id,
        }
    }

    fn apply(&self, store: &dyn NoteStore) -> Result<(), StorageError> {
        match self {
            Self::Insert { note_id, strokes } => store.insert_strokes(note_id, strokes),
            Self::Delete { note_id, stroke_ids } => store.delete_strokes(note_id, stroke_ids),
        }
    }

    /// Replays the write over strokes read back from storage.
    fn apply_to(&self, live: &mut Vec<Stroke>) {
        match self {
            Self::Insert { strokes, .. } => {
                for stroke in strokes {
                    match live.iter_mut().find(|s| s.id == stroke.id) {
                        Some(slot) => *slot = stroke.clone(),
                        None => live.push(stroke.clone()),
                    }
                }
            }
            Self::Delete { stroke_ids, .. } => live.retain(|s| !stroke_ids.contains(&s.id)),
        }
    }
}

/// Writes and history that have not reached storage yet. Writes for a note
/// stay in submission order: once one is queued, later ones queue behind it.
#[derive(Default)]
struct Backlog {
    writes: Vec<PendingWrite>,
    history_notes: BTreeSet<String>,
}

impl Backlog {
    fn has_writes_for(&self, note_id: &str) -> bool {
        self.writes.iter().any(|w| w.note_id() == note_id)
    }
}

/// Session owner of the stroke cache, the history log and the drawing gate.
///
/// Every mutation for a note runs while holding the gate, applies its edits
/// to storage and cache, records history, releases the gate and then emits
/// the redraw signal.
pub struct DrawingCoordinator {
    store: Arc<dyn NoteStore>,
    cache: Mutex<StrokeCache>,
    history: Mutex<HistoryLog>,
    viewport: RwLock<ViewportTransformer>,
    gate: DrawingGate,
    signals: SignalHub,
    settings: InkSettings,
    unsaved_changes: AtomicBool,
    backlog: Mutex<Backlog>,
}

impl DrawingCoordinator {
    pub fn new(store: Arc<dyn NoteStore>, viewport: ViewportTransformer, settings: InkSettings) -> Self {
        Self::with_monitor(store, viewport, settings, MemoryMonitor::default())
    }

    pub fn with_monitor(
        store: Arc<dyn NoteStore>,
        viewport: ViewportTransformer,
        mut settings: InkSettings,
        monitor: MemoryMonitor,
    ) -> Self {
        settings.sanitize();
        Self {
            cache: Mutex::new(StrokeCache::new(
                settings.max_entries,
                settings.memory_threshold_bytes,
                monitor,
            )),
            history: Mutex::new(HistoryLog::new(Arc::clone(&store), settings.max_stored_actions)),
            store,
            viewport: RwLock::new(viewport),
            gate: DrawingGate::new(),
            signals: SignalHub::new(),
            settings,
            unsaved_changes: AtomicBool::new(false),
            backlog: Mutex::new(Backlog::default()),
        }
    }

    pub fn settings(&self) -> &InkSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> Receiver<InkSignal> {
        self.signals.subscribe()
    }

    pub fn is_drawing(&self) -> bool {
        self.gate.is_held()
    }

    pub fn unsaved_changes(&self) -> bool {
        self.unsaved_changes.load(Ordering::SeqCst)
    }

    /// Loads the note's history and warms its cache entry.
    pub fn open_note(&self, note_id: &str) {
        self.lock_history().open(note_id);
        let strokes = self.strokes_for(note_id);
        tracing::info!(note_id, strokes = strokes.len(), "note opened");
        self.emit_history(note_id);
        self.signals.emit(InkSignal::RefreshUi);
    }

    /// Cached strokes of a note, loading them from storage on a miss.
    /// Writes still waiting for `flush_pending` are replayed over the loaded
    /// list. A failed load yields an empty, uncached list.
    pub fn strokes_for(&self, note_id: &str) -> StrokeList {
        if let Some(strokes) = self.lock_cache().get(note_id) {
            return strokes;
        }
        match self.store.strokes_for_note(note_id) {
            Ok(mut strokes) => {
                for write in self.lock_backlog().writes.iter().filter(|w| w.note_id() == note_id) {
                    write.apply_to(&mut strokes);
                }
                let loaded = Arc::new(strokes.clone());
                self.lock_cache().put(note_id, strokes);
                loaded
            }
            Err(err) => {
                tracing::error!(note_id, %err, "failed to load strokes");
                Arc::new(Vec::new())
            }
        }
    }

    /// Broadcasts pen-down / pen-up to subscribers.
    pub fn set_drawing(&self, drawing: bool) {
        self.signals.emit(InkSignal::DrawingChanged(drawing));
    }

    pub fn commit_stroke(&self, stroke: Stroke) -> CommitOutcome {
        if stroke.points.is_empty() {
            return CommitOutcome::NoOp;
        }
        let note_id = stroke.note_id.clone();
        let dirty = Some(stroke.bounds);
        self.perform(&note_id, |_| {
            Some((ActionPayload::AddStrokes(StrokePayload::from_strokes(vec![stroke])), dirty))
        })
    }

    /// Erases every stroke touched by a page-space path.
    pub fn erase(&self, note_id: &str, path: &[(f32, f32)]) -> CommitOutcome {
        let radius = self.settings.erase_radius;
        let padding = self.settings.dirty_padding;
        self.perform(note_id, |live| {
            let hits: Vec<Stroke> = find_strokes_to_erase(live, path, radius)
                .into_iter()
                .cloned()
                .collect();
            let dirty = dirty_rect(&hits, padding)?;
            Some((ActionPayload::DeleteStrokes(StrokePayload::from_strokes(hits)), Some(dirty)))
        })
    }

    pub fn move_strokes(&self, note_id: &str, stroke_ids: &[String], dx: f32, dy: f32) -> CommitOutcome {
        if dx == 0.0 && dy == 0.0 {
            return CommitOutcome::NoOp;
        }
        let padding = self.settings.dirty_padding;
        self.perform(note_id, |live| {
            let ids: HashSet<&str> = stroke_ids.iter().map(String::as_str).collect();
            let originals: Vec<Stroke> = live
                .iter()
                .filter(|s| ids.contains(s.id.as_str()))
                .cloned()
                .collect();
            let before = dirty_rect(&originals, padding)?;
            let dirty = before.union(before.translate(dx, dy));
            Some((ActionPayload::MoveStrokes(MovePayload::new(originals, dx, dy)), Some(dirty)))
        })
    }

    /// Inserts a blank page before `page_number` (1-based), pushing every
    /// stroke at or below that page's top down by one page.
    pub fn insert_page(&self, note_id: &str, page_number: usize) -> CommitOutcome {
        let (insert_y, offset) = {
            let viewport = self.read_viewport();
            let pagination = viewport.pagination();
            match pagination.insertion_y(page_number) {
                Some(y) => (y, pagination.page_unit()),
                None => return CommitOutcome::NoOp,
            }
        };
        self.perform(note_id, |live| {
            let affected_stroke_ids = live
                .iter()
                .filter(|s| s.bounds.top >= insert_y)
                .map(|s| s.id.clone())
                .collect();
            Some((
                ActionPayload::InsertPage(InsertPagePayload {
                    page_number: page_number as u32,
                    affected_stroke_ids,
                    page_offset: offset,
                }),
                None,
            ))
        })
    }

    pub fn undo(&self, note_id: &str) -> bool {
        self.replay(note_id, true).is_committed()
    }

    pub fn redo(&self, note_id: &str) -> bool {
        self.replay(note_id, false).is_committed()
    }

    /// Like `undo`, but tells an empty history (`NoOp`) apart from a busy
    /// gate (`Busy`).
    pub fn undo_step(&self, note_id: &str) -> CommitOutcome {
        self.replay(note_id, true)
    }

    pub fn redo_step(&self, note_id: &str) -> CommitOutcome {
        self.replay(note_id, false)
    }

    pub fn history_state(&self, note_id: &str) -> HistoryState {
        self.lock_history().state(note_id)
    }

    pub fn can_undo(&self, note_id: &str) -> bool {
        self.history_state(note_id).can_undo
    }

    pub fn can_redo(&self, note_id: &str) -> bool {
        self.history_state(note_id).can_redo
    }

    /// Retained history of the note, oldest first.
    pub fn history_actions(&self, note_id: &str) -> Vec<HistoryAction> {
        self.lock_history().retained(note_id)
    }

    pub fn clear_history(&self, note_id: &str) {
        if self.lock_history().clear(note_id) == Durability::NotDurable {
            self.lock_backlog().history_notes.insert(note_id.to_string());
            self.unsaved_changes.store(true, Ordering::SeqCst);
        }
        self.emit_history(note_id);
    }

    /// Retries writes that failed earlier. Clears the unsaved flag once the
    /// backlog is empty.
    pub fn flush_pending(&self) -> bool {
        let mut backlog = self.lock_backlog();
        let mut flushed = 0;
        for write in &backlog.writes {
            if let Err(err) = write.apply(self.store.as_ref()) {
                tracing::warn!(%err, remaining = backlog.writes.len() - flushed, "flush of pending writes stopped");
                break;
            }
            flushed += 1;
        }
        backlog.writes.drain(..flushed);

        let notes: Vec<String> = backlog.history_notes.iter().cloned().collect();
        for note_id in notes {
            if self.lock_history().resync(&note_id) == Durability::Durable {
                backlog.history_notes.remove(&note_id);
            }
        }

        let clean = backlog.writes.is_empty() && backlog.history_notes.is_empty();
        if clean {
            self.unsaved_changes.store(false, Ordering::SeqCst);
        }
        clean
    }

    /// Waits for any in-flight commit. On timeout the caller proceeds with a
    /// possibly stale stroke view.
    pub fn wait_for_idle(&self) -> bool {
        self.gate
            .wait_until_free(self.settings.wait_timeout(), self.settings.poll_interval())
    }

    /// Paints the note's visible strokes. `dirty` is a page-space region from
    /// a `ForceRedraw` signal. Returns `false` when the frame was skipped.
    pub fn render(&self, note_id: &str, surface: &mut dyn RenderSurface, dirty: Option<Rect>) -> bool {
        self.wait_for_idle();
        let strokes = self.strokes_for(note_id);
        let viewport = self.read_viewport();
        render_frame(surface, &viewport, &strokes, dirty)
    }

    pub fn with_viewport<R>(&self, f: impl FnOnce(&ViewportTransformer) -> R) -> R {
        f(&self.read_viewport())
    }

    /// Mutates the viewport and asks the UI to refresh.
    pub fn update_viewport<R>(&self, f: impl FnOnce(&mut ViewportTransformer) -> R) -> R {
        let result = f(&mut self.write_viewport());
        self.signals.emit(InkSignal::RefreshUi);
        result
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    pub fn is_cached(&self, note_id: &str) -> bool {
        self.lock_cache().contains(note_id)
    }

    /// Shrinks the cache if the memory monitor advises it.
    pub fn trim_cache(&self) -> usize {
        self.lock_cache().trim_if_advised()
    }

    /// Drops the cached strokes of a note, e.g. after an external overwrite.
    pub fn invalidate(&self, note_id: &str) {
        self.lock_cache().invalidate(note_id);
        self.signals.emit(InkSignal::ForceRedraw(None));
    }

    /// Disconnects every signal subscriber.
    pub fn close(&self) {
        self.signals.close();
    }

    pub(crate) fn emit(&self, signal: InkSignal) {
        self.signals.emit(signal);
    }

    #[cfg(test)]
    pub(crate) fn gate(&self) -> &DrawingGate {
        &self.gate
    }

    /// Runs one recorded mutation under the gate. `build` sees the live
    /// strokes and returns the action with its dirty rect, or `None` for a no-op.
    fn perform<F>(&self, note_id: &str, build: F) -> CommitOutcome
    where
        F: FnOnce(&[Stroke]) -> Option<(ActionPayload, Option<Rect>)>,
    {
        let Some(guard) = self
            .gate
            .acquire_within(self.settings.wait_timeout(), self.settings.poll_interval())
        else {
            tracing::warn!(note_id, "commit dropped, drawing gate busy");
            return CommitOutcome::Busy;
        };

        let live = self.strokes_for(note_id);
        let Some((payload, dirty)) = build(live.as_slice()) else {
            return CommitOutcome::NoOp;
        };
        let kind = payload.kind();
        let edits = payload.forward_edits();
        let mut durability = self.apply_edits(note_id, &edits);
        let recorded = self.lock_history().record(note_id, payload);
        if recorded.durability == Durability::NotDurable {
            self.lock_backlog().history_notes.insert(note_id.to_string());
            self.unsaved_changes.store(true, Ordering::SeqCst);
            durability = Durability::NotDurable;
        }
        drop(guard);

        tracing::debug!(note_id, action = kind.key(), sequence = recorded.sequence, "action committed");
        self.signals.emit(InkSignal::ForceRedraw(dirty));
        self.emit_history(note_id);
        CommitOutcome::Committed {
            sequence: recorded.sequence,
            durability,
            dirty,
        }
    }

    fn replay(&self, note_id: &str, undo: bool) -> CommitOutcome {
        let Some(guard) = self
            .gate
            .acquire_within(self.settings.wait_timeout(), self.settings.poll_interval())
        else {
            tracing::warn!(note_id, undo, "undo/redo dropped, drawing gate busy");
            return CommitOutcome::Busy;
        };
        let action = {
            let mut history = self.lock_history();
            if undo {
                history.undo(note_id)
            } else {
                history.redo(note_id)
            }
        };
        let Some(action) = action else {
            return CommitOutcome::NoOp;
        };
        let edits = if undo {
            action.inverse_edits()
        } else {
            action.forward_edits()
        };
        let durability = self.apply_edits(note_id, &edits);
        drop(guard);

        tracing::debug!(note_id, undo, sequence = action.sequence, "history replayed");
        self.signals.emit(InkSignal::UndoRedoPerformed);
        self.signals.emit(InkSignal::ForceRedraw(None));
        self.emit_history(note_id);
        CommitOutcome::Committed {
            sequence: action.sequence,
            durability,
            dirty: None,
        }
    }

    /// Applies stroke edits to storage and cache. Storage failures are queued
    /// for `flush_pending` and never roll back the in-memory state. While a
    /// note has queued writes, its new writes queue behind them.
    fn apply_edits(&self, note_id: &str, edits: &[StrokeEdit]) -> Durability {
        let mut durability = Durability::Durable;
        for edit in edits {
            let write = match edit {
                StrokeEdit::Insert(strokes) => {
                    let ids: Vec<String> = strokes.iter().map(|s| s.id.clone()).collect();
                    let mut cache = self.lock_cache();
                    cache.remove(note_id, &ids);
                    if !cache.append(note_id, strokes) {
                        cache.invalidate(note_id);
                    }
                    Some(PendingWrite::Insert {
                        note_id: note_id.to_string(),
                        strokes: strokes.clone(),
                    })
                }
                StrokeEdit::Remove(stroke_ids) => {
                    self.lock_cache().remove(note_id, stroke_ids);
                    Some(PendingWrite::Delete {
                        note_id: note_id.to_string(),
                        stroke_ids: stroke_ids.clone(),
                    })
                }
                StrokeEdit::Translate { stroke_ids, dx, dy } => {
                    self.translate_cached(note_id, stroke_ids, *dx, *dy)
                        .map(|moved| PendingWrite::Insert {
                            note_id: note_id.to_string(),
                            strokes: moved,
                        })
                }
                StrokeEdit::ResizeDocument(delta) => {
                    let mut viewport = self.write_viewport();
                    let height = viewport.document_height() + delta;
                    viewport.update_document_height(height);
                    None
                }
            };
            let Some(write) = write else {
                continue;
            };
            if self.lock_backlog().has_writes_for(note_id) {
                tracing::debug!(note_id, "earlier writes still pending, queueing stroke write");
                self.queue_write(write);
                durability = Durability::NotDurable;
            } else if let Err(err) = write.apply(self.store.as_ref()) {
                tracing::error!(note_id, %err, "stroke write failed, keeping change in memory");
                self.queue_write(write);
                durability = Durability::NotDurable;
            }
        }
        durability
    }

    /// Moves the listed strokes in the live set and returns the moved copies.
    fn translate_cached(&self, note_id: &str, stroke_ids: &[String], dx: f32, dy: f32) -> Option<Vec<Stroke>> {
        let ids: HashSet<&str> = stroke_ids.iter().map(String::as_str).collect();
        let live = self.strokes_for(note_id);
        let mut moved_by_id: HashMap<String, Stroke> = HashMap::new();
        let updated: Vec<Stroke> = live
            .iter()
            .map(|stroke| {
                if ids.contains(stroke.id.as_str()) {
                    let moved = stroke.translated(dx, dy);
                    moved_by_id.insert(moved.id.clone(), moved.clone());
                    moved
                } else {
                    stroke.clone()
                }
            })
            .collect();
        if moved_by_id.is_empty() {
            return None;
        }
        let mut cache = self.lock_cache();
        if !cache.put(note_id, updated) {
            cache.invalidate(note_id);
        }
        Some(moved_by_id.into_values().collect())
    }

    fn queue_write(&self, write: PendingWrite) {
        self.lock_backlog().writes.push(write);
        self.unsaved_changes.store(true, Ordering::SeqCst);
    }

    fn emit_history(&self, note_id: &str) {
        let state = self.history_state(note_id);
        self.signals.emit(InkSignal::HistoryChanged {
            note_id: note_id.to_string(),
            state,
        });
    }

    fn lock_cache(&self) -> MutexGuard<'_, StrokeCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_history(&self) -> MutexGuard<'_, HistoryLog> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_backlog(&self) -> MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_viewport(&self) -> RwLockReadGuard<'_, ViewportTransformer> {
        self.viewport.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_viewport(&self) -> RwLockWriteGuard<'_, ViewportTransformer> {
        self.viewport.write().unwrap_or_else(PoisonError::into_inner)
    }
}
