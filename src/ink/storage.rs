use crate::ink::model::{Stroke, StrokePoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("no such {kind}: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("history payload could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One history action row as the store keeps it. `data` is the JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAction {
    pub id: String,
    pub note_id: String,
    pub kind: String,
    pub data: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Persisted note storage consumed by the history log and the cache miss path.
///
/// Inserts replace rows with the same id.
pub trait NoteStore: Send + Sync {
    /// Strokes of a note, each with its points ordered by sequence number.
    fn strokes_for_note(&self, note_id: &str) -> StorageResult<Vec<Stroke>>;
    fn insert_strokes(&self, note_id: &str, strokes: &[Stroke]) -> StorageResult<()>;
    fn delete_strokes(&self, note_id: &str, stroke_ids: &[String]) -> StorageResult<()>;
    fn points_for_stroke(&self, stroke_id: &str) -> StorageResult<Vec<StrokePoint>>;

    /// Retained actions of a note ordered by ascending sequence number.
    fn actions_for_note(&self, note_id: &str) -> StorageResult<Vec<StoredAction>>;
    fn insert_action(&self, action: &StoredAction) -> StorageResult<()>;
    fn insert_actions(&self, actions: &[StoredAction]) -> StorageResult<()>;
    fn max_sequence(&self, note_id: &str) -> StorageResult<Option<u64>>;
    fn delete_actions_above(&self, note_id: &str, sequence: u64) -> StorageResult<()>;
    /// Keeps only the `keep` highest sequence numbers of the note.
    fn prune_actions(&self, note_id: &str, keep: usize) -> StorageResult<()>;
    fn clear_actions(&self, note_id: &str) -> StorageResult<()>;
}

#[derive(Default)]
struct MemoryTables {
    strokes: HashMap<String, Vec<Stroke>>,
    actions: HashMap<String, BTreeMap<u64, StoredAction>>,
}

/// In-process `NoteStore`. Writes can be switched to fail to exercise the
/// not-durable paths.
#[derive(Default)]
pub struct MemoryNoteStore {
    tables: Mutex<MemoryTables>,
    fail_writes: AtomicBool,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stroke_ids(&self, note_id: &str) -> Vec<String> {
        self.tables()
            .strokes
            .get(note_id)
            .map(|strokes| strokes.iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    fn tables(&self) -> MutexGuard<'_, MemoryTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

impl NoteStore for MemoryNoteStore {
    fn strokes_for_note(&self, note_id: &str) -> StorageResult<Vec<Stroke>> {
        let mut strokes = self
            .tables()
            .strokes
            .get(note_id)
            .cloned()
            .unwrap_or_default();
        for stroke in &mut strokes {
            stroke.points.sort_by_key(|p| p.sequence);
        }
        Ok(strokes)
    }

    fn insert_strokes(&self, note_id: &str, strokes: &[Stroke]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        let existing = tables.strokes.entry(note_id.to_string()).or_default();
        for stroke in strokes {
            match existing.iter_mut().find(|s| s.id == stroke.id) {
                Some(slot) => *slot = stroke.clone(),
                None => existing.push(stroke.clone()),
            }
        }
        Ok(())
    }

    fn delete_strokes(&self, note_id: &str, stroke_ids: &[String]) -> StorageResult<()> {
        self.check_writable()?;
        if let Some(existing) = self.tables().strokes.get_mut(note_id) {
            existing.retain(|s| !stroke_ids.contains(&s.id));
        }
        Ok(())
    }

    fn points_for_stroke(&self, stroke_id: &str) -> StorageResult<Vec<StrokePoint>> {
        let tables = self.tables();
        let stroke = tables
            .strokes
            .values()
            .flatten()
            .find(|s| s.id == stroke_id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "stroke",
                id: stroke_id.to_string(),
            })?;
        let mut points = stroke.points.clone();
        points.sort_by_key(|p| p.sequence);
        Ok(points)
    }

    fn actions_for_note(&self, note_id: &str) -> StorageResult<Vec<StoredAction>> {
        Ok(self
            .tables()
            .actions
            .get(note_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn insert_action(&self, action: &StoredAction) -> StorageResult<()> {
        self.insert_actions(std::slice::from_ref(action))
    }

    fn insert_actions(&self, actions: &[StoredAction]) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        for action in actions {
            let rows = tables.actions.entry(action.note_id.clone()).or_default();
            rows.retain(|_, row| row.id != action.id);
            rows.insert(action.sequence, action.clone());
        }
        Ok(())
    }

    fn max_sequence(&self, note_id: &str) -> StorageResult<Option<u64>> {
        Ok(self
            .tables()
            .actions
            .get(note_id)
            .and_then(|rows| rows.keys().next_back().copied()))
    }

    fn delete_actions_above(&self, note_id: &str, sequence: u64) -> StorageResult<()> {
        self.check_writable()?;
        if let Some(rows) = self.tables().actions.get_mut(note_id) {
            rows.retain(|&seq, _| seq <= sequence);
        }
        Ok(())
    }

    fn prune_actions(&self, note_id: &str, keep: usize) -> StorageResult<()> {
        self.check_writable()?;
        if let Some(rows) = self.tables().actions.get_mut(note_id) {
            while rows.len() > keep {
                rows.pop_first();
            }
        }
        Ok(())
    }

    fn clear_actions(&self, note_id: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.tables().actions.remove(note_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ink::model::fixtures::stroke_with_n_points;

    fn action(note: &str, sequence: u64) -> StoredAction {
        StoredAction {
            id: format!("{note}-{sequence}"),
            note_id: note.to_string(),
            kind: "ADD_STROKES".into(),
            data: "{}".into(),
            sequence,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prune_keeps_highest_sequences() {
        let store = MemoryNoteStore::new();
        let rows: Vec<_> = (1..=5).map(|seq| action("n", seq)).collect();
        store.insert_actions(&rows).unwrap();
        store.prune_actions("n", 2).unwrap();
        let kept: Vec<u64> = store
            .actions_for_note("n")
            .unwrap()
            .iter()
            .map(|a| a.sequence)
            .collect();
        assert_eq!(kept, vec![4, 5]);
        assert_eq!(store.max_sequence("n").unwrap(), Some(5));
    }

    #[test]
    fn delete_above_truncates_redo_rows() {
        let store = MemoryNoteStore::new();
        for seq in 1..=3 {
            store.insert_action(&action("n", seq)).unwrap();
        }
        store.delete_actions_above("n", 1).unwrap();
        assert_eq!(store.max_sequence("n").unwrap(), Some(1));
    }

    #[test]
    fn failing_writes_surface_unavailable() {
        let store = MemoryNoteStore::new();
        store.set_fail_writes(true);
        let err = store
            .insert_strokes("n", &[stroke_with_n_points("s", "n", 2)])
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(store.strokes_for_note("n").unwrap().is_empty());
    }

    #[test]
    fn points_lookup_reports_missing_stroke() {
        let store = MemoryNoteStore::new();
        store
            .insert_strokes("n", &[stroke_with_n_points("s", "n", 3)])
            .unwrap();
        assert_eq!(store.points_for_stroke("s").unwrap().len(), 3);
        assert!(matches!(
            store.points_for_stroke("missing"),
            Err(StorageError::NotFound { .. })
        ));
    }
}
