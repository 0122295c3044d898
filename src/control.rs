use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Pause and cancel flags shared by every in-flight transfer.
///
/// The flags are manager-wide: there is no way to pause or cancel a single
/// download without affecting all the others.
#[derive(Debug, Default)]
pub struct ControlSignals {
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Raises the cancel flag, holds it for `width`, then lowers it again.
    ///
    /// Only transfers that poll the flag inside that window stop. With a zero
    /// width the reset is immediate and most transfers will never see it.
    pub async fn pulse_cancel(&self, width: Duration) {
        self.set_cancelled(true);
        if !width.is_zero() {
            tokio::time::sleep(width).await;
        }
        self.set_cancelled(false);
    }
}
