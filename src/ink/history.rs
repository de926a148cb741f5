use crate::ink::model::Stroke;
use crate::ink::storage::{NoteStore, StorageError, StoredAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub const DEFAULT_MAX_STORED_ACTIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    AddStrokes,
    DeleteStrokes,
    MoveStrokes,
    InsertPage,
}

impl ActionKind {
    pub fn key(self) -> &'static str {
        match self {
            Self::AddStrokes => "ADD_STROKES",
            Self::DeleteStrokes => "DELETE_STROKES",
            Self::MoveStrokes => "MOVE_STROKES",
            Self::InsertPage => "INSERT_PAGE",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        [
            Self::AddStrokes,
            Self::DeleteStrokes,
            Self::MoveStrokes,
            Self::InsertPage,
        ]
        .into_iter()
        .find(|kind| kind.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokePayload {
    pub stroke_ids: Vec<String>,
    pub strokes: Vec<Stroke>,
}

impl StrokePayload {
    pub fn from_strokes(strokes: Vec<Stroke>) -> Self {
        Self {
            stroke_ids: strokes.iter().map(|s| s.id.clone()).collect(),
            strokes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePayload {
    pub stroke_ids: Vec<String>,
    /// Strokes as they were before the move.
    pub original_strokes: Vec<Stroke>,
    pub dx: f32,
    pub dy: f32,
}

impl MovePayload {
    pub fn new(original_strokes: Vec<Stroke>, dx: f32, dy: f32) -> Self {
        Self {
            stroke_ids: original_strokes.iter().map(|s| s.id.clone()).collect(),
            original_strokes,
            dx,
            dy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertPagePayload {
    pub page_number: u32,
    pub affected_stroke_ids: Vec<String>,
    pub page_offset: f32,
}

/// What a reversible action did. The kind is implied by the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    AddStrokes(StrokePayload),
    DeleteStrokes(StrokePayload),
    MoveStrokes(MovePayload),
    InsertPage(InsertPagePayload),
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::AddStrokes(_) => ActionKind::AddStrokes,
            Self::DeleteStrokes(_) => ActionKind::DeleteStrokes,
            Self::MoveStrokes(_) => ActionKind::MoveStrokes,
            Self::InsertPage(_) => ActionKind::InsertPage,
        }
    }

    pub fn forward_edits(&self) -> Vec<StrokeEdit> {
        match self {
            Self::AddStrokes(data) => vec![StrokeEdit::Insert(data.strokes.clone())],
            Self::DeleteStrokes(data) => vec![StrokeEdit::Remove(data.stroke_ids.clone())],
            Self::MoveStrokes(data) => vec![StrokeEdit::Translate {
                stroke_ids: data.stroke_ids.clone(),
                dx: data.dx,
                dy: data.dy,
            }],
            Self::InsertPage(data) => vec![
                StrokeEdit::Translate {
                    stroke_ids: data.affected_stroke_ids.clone(),
                    dx: 0.0,
                    dy: data.page_offset,
                },
                StrokeEdit::ResizeDocument(data.page_offset),
            ],
        }
    }

    pub fn inverse_edits(&self) -> Vec<StrokeEdit> {
        match self {
            Self::AddStrokes(data) => vec![StrokeEdit::Remove(data.stroke_ids.clone())],
            Self::DeleteStrokes(data) => vec![StrokeEdit::Insert(data.strokes.clone())],
            Self::MoveStrokes(data) => vec![StrokeEdit::Translate {
                stroke_ids: data.stroke_ids.clone(),
                dx: -data.dx,
                dy: -data.dy,
            }],
            Self::InsertPage(data) => vec![
                StrokeEdit::Translate {
                    stroke_ids: data.affected_stroke_ids.clone(),
                    dx: 0.0,
                    dy: -data.page_offset,
                },
                StrokeEdit::ResizeDocument(-data.page_offset),
            ],
        }
    }

    fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::AddStrokes(data) | Self::DeleteStrokes(data) => serde_json::to_string(data),
            Self::MoveStrokes(data) => serde_json::to_string(data),
            Self::InsertPage(data) => serde_json::to_string(data),
        }
    }

    fn decode(kind: ActionKind, data: &str) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ActionKind::AddStrokes => Self::AddStrokes(serde_json::from_str(data)?),
            ActionKind::DeleteStrokes => Self::DeleteStrokes(serde_json::from_str(data)?),
            ActionKind::MoveStrokes => Self::MoveStrokes(serde_json::from_str(data)?),
            ActionKind::InsertPage => Self::InsertPage(serde_json::from_str(data)?),
        })
    }
}

/// One mutation of a note's live strokes.
#[derive(Debug, Clone, PartialEq)]
pub enum StrokeEdit {
    Insert(Vec<Stroke>),
    Remove(Vec<String>),
    Translate {
        stroke_ids: Vec<String>,
        dx: f32,
        dy: f32,
    },
    /// Change of the document height, in page units.
    ResizeDocument(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryAction {
    pub id: String,
    pub note_id: String,
    pub payload: ActionPayload,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl HistoryAction {
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    pub fn forward_edits(&self) -> Vec<StrokeEdit> {
        self.payload.forward_edits()
    }

    pub fn inverse_edits(&self) -> Vec<StrokeEdit> {
        self.payload.inverse_edits()
    }

    pub fn to_stored(&self) -> Result<StoredAction, serde_json::Error> {
        Ok(StoredAction {
            id: self.id.clone(),
            note_id: self.note_id.clone(),
            kind: self.kind().key().to_string(),
            data: self.payload.encode()?,
            sequence: self.sequence,
            created_at: self.created_at,
        })
    }

    pub fn from_stored(row: &StoredAction) -> Result<Self, StorageError> {
        let kind = ActionKind::from_key(&row.kind).ok_or_else(|| StorageError::NotFound {
            kind: "action kind",
            id: row.kind.clone(),
        })?;
        Ok(Self {
            id: row.id.clone(),
            note_id: row.note_id.clone(),
            payload: ActionPayload::decode(kind, &row.data)?,
            sequence: row.sequence,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryState {
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Whether a history write reached persisted storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Durable,
    NotDurable,
}

impl Durability {
    fn and(self, other: Durability) -> Durability {
        if self == Durability::Durable && other == Durability::Durable {
            Durability::Durable
        } else {
            Durability::NotDurable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub sequence: u64,
    pub durability: Durability,
}

/// Retained actions of one note. `cursor` counts the applied actions, so
/// `actions[..cursor]` can be undone and `actions[cursor..]` redone.
#[derive(Debug, Default)]
struct NoteHistory {
    actions: VecDeque<HistoryAction>,
    cursor: usize,
    next_sequence: u64,
}

impl NoteHistory {
    fn state(&self) -> HistoryState {
        HistoryState {
            can_undo: self.cursor > 0,
            can_redo: self.cursor < self.actions.len(),
        }
    }

    fn cursor_sequence(&self) -> u64 {
        if self.cursor == 0 {
            0
        } else {
            self.actions[self.cursor - 1].sequence
        }
    }
}

/// Append-only, per-note undo/redo log backed by a `NoteStore`.
pub struct HistoryLog {
    notes: HashMap<String, NoteHistory>,
    store: Arc<dyn NoteStore>,
    max_stored_actions: usize,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn NoteStore>, max_stored_actions: usize) -> Self {
        Self {
            notes: HashMap::new(),
            store,
            max_stored_actions: max_stored_actions.max(1),
        }
    }

    /// Loads the note's retained actions from storage, cursor at the head.
    /// Rows that cannot be decoded are skipped.
    pub fn open(&mut self, note_id: &str) {
        if self.notes.contains_key(note_id) {
            return;
        }
        let mut history = NoteHistory {
            next_sequence: 1,
            ..NoteHistory::default()
        };
        match self.store.actions_for_note(note_id) {
            Ok(rows) => {
                for row in &rows {
                    match HistoryAction::from_stored(row) {
                        Ok(action) => history.actions.push_back(action),
                        Err(err) => {
                            tracing::warn!(note_id, sequence = row.sequence, %err, "skipping unreadable history row");
                        }
                    }
                    history.next_sequence = history.next_sequence.max(row.sequence + 1);
                }
                history.cursor = history.actions.len();
                tracing::debug!(note_id, actions = history.actions.len(), "history loaded");
            }
            Err(err) => {
                tracing::error!(note_id, %err, "failed to load history, starting empty");
            }
        }
        self.notes.insert(note_id.to_string(), history);
    }

    /// Appends a new action, discarding any redoable actions first.
    pub fn record(&mut self, note_id: &str, payload: ActionPayload) -> Recorded {
        self.open(note_id);
        let store = Arc::clone(&self.store);
        let max_stored = self.max_stored_actions;
        let Some(history) = self.notes.get_mut(note_id) else {
            return Recorded {
                sequence: 0,
                durability: Durability::NotDurable,
            };
        };

        let mut durability = Durability::Durable;
        if history.cursor < history.actions.len() {
            history.actions.truncate(history.cursor);
            let keep_through = history.cursor_sequence();
            durability = durability.and(persisted(
                note_id,
                "truncate redo history",
                store.delete_actions_above(note_id, keep_through),
            ));
        }

        let sequence = history.next_sequence;
        history.next_sequence += 1;
        let action = HistoryAction {
            id: uuid::Uuid::new_v4().to_string(),
            note_id: note_id.to_string(),
            payload,
            sequence,
            created_at: Utc::now(),
        };
        let write = action
            .to_stored()
            .map_err(StorageError::from)
            .and_then(|row| store.insert_action(&row));
        durability = durability.and(persisted(note_id, "insert history action", write));
        history.actions.push_back(action);
        history.cursor = history.actions.len();

        if history.actions.len() > max_stored {
            while history.actions.len() > max_stored {
                history.actions.pop_front();
            }
            history.cursor = history.actions.len();
            durability = durability.and(persisted(
                note_id,
                "prune history",
                store.prune_actions(note_id, max_stored),
            ));
            tracing::debug!(note_id, retained = max_stored, "history pruned");
        }

        Recorded {
            sequence,
            durability,
        }
    }

    /// Steps the cursor back and returns the action whose inverse must be applied.
    pub fn undo(&mut self, note_id: &str) -> Option<HistoryAction> {
        self.open(note_id);
        let history = self.notes.get_mut(note_id)?;
        if history.cursor == 0 {
            tracing::debug!(note_id, "nothing to undo");
            return None;
        }
        history.cursor -= 1;
        Some(history.actions[history.cursor].clone())
    }

    /// Steps the cursor forward and returns the action to re-apply.
    pub fn redo(&mut self, note_id: &str) -> Option<HistoryAction> {
        self.open(note_id);
        let history = self.notes.get_mut(note_id)?;
        if history.cursor == history.actions.len() {
            tracing::debug!(note_id, "nothing to redo");
            return None;
        }
        let action = history.actions[history.cursor].clone();
        history.cursor += 1;
        Some(action)
    }

    pub fn state(&self, note_id: &str) -> HistoryState {
        self.notes
            .get(note_id)
            .map(NoteHistory::state)
            .unwrap_or_default()
    }

    pub fn can_undo(&self, note_id: &str) -> bool {
        self.state(note_id).can_undo
    }

    pub fn can_redo(&self, note_id: &str) -> bool {
        self.state(note_id).can_redo
    }

    pub fn retained(&self, note_id: &str) -> Vec<HistoryAction> {
        self.notes
            .get(note_id)
            .map(|h| h.actions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn retained_sequences(&self, note_id: &str) -> Vec<u64> {
        self.notes
            .get(note_id)
            .map(|h| h.actions.iter().map(|a| a.sequence).collect())
            .unwrap_or_default()
    }

    /// Drops all history of the note, in memory and in storage.
    pub fn clear(&mut self, note_id: &str) -> Durability {
        if let Some(history) = self.notes.get_mut(note_id) {
            history.actions.clear();
            history.cursor = 0;
        }
        persisted(
            note_id,
            "clear history",
            self.store.clear_actions(note_id),
        )
    }

    /// Rewrites the stored history of a note from the in-memory log.
    pub fn resync(&mut self, note_id: &str) -> Durability {
        let Some(history) = self.notes.get(note_id) else {
            return Durability::Durable;
        };
        let rows: Result<Vec<StoredAction>, serde_json::Error> =
            history.actions.iter().map(HistoryAction::to_stored).collect();
        let write = rows.map_err(StorageError::from).and_then(|rows| {
            self.store.clear_actions(note_id)?;
            self.store.insert_actions(&rows)
        });
        persisted(note_id, "resync history", write)
    }
}

fn persisted(note_id: &str, what: &str, result: Result<(), StorageError>) -> Durability {
    match result {
        Ok(()) => Durability::Durable,
        Err(err) => {
            tracing::error!(note_id, %err, "{what} failed");
            Durability::NotDurable
        }
    }
}
