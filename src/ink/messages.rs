use crate::ink::input::{DigitizerEvent, PenStyle};
use crate::ink::model::Stroke;

/// Work submitted to the ink service worker. Commands run one at a time in
/// submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum InkCommand {
    OpenNote(String),
    CloseNote,
    Input(DigitizerEvent),
    SetPenStyle(PenStyle),
    CommitStroke(Stroke),
    Erase {
        note_id: String,
        path: Vec<(f32, f32)>,
    },
    MoveStrokes {
        note_id: String,
        stroke_ids: Vec<String>,
        dx: f32,
        dy: f32,
    },
    InsertPage {
        note_id: String,
        page_number: usize,
    },
    Undo(String),
    Redo(String),
    Scroll {
        dx: f32,
        dy: f32,
    },
    Zoom {
        factor: f32,
        focus_x: f32,
        focus_y: f32,
    },
    FlushPending,
    TrimCache,
}
