use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Binary, non-reentrant "commit in flight" flag.
///
/// Held for the duration of one stroke, erase or undo/redo commit. Readers
/// that need a consistent stroke view poll it with a bounded wait.
#[derive(Debug, Default)]
pub struct DrawingGate {
    held: AtomicBool,
}

/// Releases the gate when dropped.
#[derive(Debug)]
pub struct GateGuard<'a> {
    gate: &'a DrawingGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}

impl DrawingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> Option<GateGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard { gate: self })
    }

    /// Polls until the gate can be taken or `timeout` elapses.
    pub fn acquire_within(&self, timeout: Duration, poll: Duration) -> Option<GateGuard<'_>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_acquire() {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "timed out acquiring drawing gate");
                return None;
            }
            sleep(poll);
        }
    }

    /// Waits for an in-flight commit to finish without taking the gate.
    /// Returns `false` on timeout; the caller proceeds with a possibly stale view.
    pub fn wait_until_free(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_held() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "drawing still in progress after timeout, proceeding with stale strokes"
                );
                return false;
            }
            sleep(poll);
        }
        true
    }
}
