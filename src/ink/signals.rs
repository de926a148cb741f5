use crate::ink::history::HistoryState;
use crate::ink::model::Rect;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum InkSignal {
    DrawingChanged(bool),
    /// Page-space area to repaint; `None` repaints the whole surface.
    ForceRedraw(Option<Rect>),
    RefreshUi,
    UndoRedoPerformed,
    HistoryChanged {
        note_id: String,
        state: HistoryState,
    },
    /// A queued command was abandoned because the drawing gate stayed busy.
    CommandDropped {
        note_id: String,
        command: &'static str,
    },
}

/// Signals buffered per subscriber before new ones are dropped for it.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Broadcasts session signals to every live subscriber.
///
/// Each subscriber owns a bounded channel. Emission never blocks: a
/// subscriber whose buffer is full misses signals until it catches up.
/// Dropped receivers are pruned on the next emit.
#[derive(Default)]
pub struct SignalHub {
    subscribers: Mutex<Vec<SyncSender<InkSignal>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<InkSignal> {
        let (tx, rx) = sync_channel(SUBSCRIBER_BUFFER);
        self.subscribers().push(tx);
        rx
    }

    pub fn emit(&self, signal: InkSignal) {
        let mut subscribers = self.subscribers();
        subscribers.retain(|tx| match tx.try_send(signal.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!("signal subscriber lagging, dropping signal");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Disconnects every subscriber; their receivers see the channel close.
    pub fn close(&self) {
        self.subscribers().clear();
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<SyncSender<InkSignal>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
