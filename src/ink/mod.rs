pub mod cache;
pub mod coordinator;
pub mod eraser;
pub mod gate;
pub mod history;
pub mod input;
pub mod memory;
pub mod messages;
pub mod model;
pub mod pagination;
pub mod render;
pub mod service;
pub mod signals;
pub mod storage;
pub mod viewport;

pub use cache::{CacheStats, StrokeCache, StrokeList};
pub use coordinator::{CommitOutcome, DrawingCoordinator};
pub use history::{ActionKind, Durability, HistoryAction, HistoryLog, HistoryState};
pub use input::{DigitizerDriver, DigitizerEvent, InputRouter, PenStyle, RawPoint, StrokeBuilder};
pub use messages::InkCommand;
pub use model::{Color, PenKind, Rect, Stroke, StrokePoint};
pub use pagination::{Pagination, PaperSize};
pub use render::{RecordingSurface, RenderSurface};
pub use service::InkService;
pub use signals::InkSignal;
pub use storage::{MemoryNoteStore, NoteStore, StorageError};
pub use viewport::ViewportTransformer;
