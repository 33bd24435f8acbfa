//! In-process broadcast signals consumed by presentation layers.

use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The local store is about to be replaced. Views should blank.
    StoreWillReset,
    /// Replacement finished, or was abandoned with the store untouched.
    StoreDidReset,
    /// Local data now mirrors the backend.
    DataSynced,
    /// Human-readable status from the backend.
    ServerStatus(String),
}

#[derive(Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<Signal>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, signal: Signal) {
        trace!(?signal, "emitting signal");
        // No subscribers is fine.
        let _ = self.sender.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    /// Open a reset bracket around a local store replacement.
    ///
    /// Emits [`Signal::StoreWillReset`] now. [`ResetGuard::finish`] emits
    /// [`Signal::StoreDidReset`] then [`Signal::DataSynced`]; dropping the
    /// guard without finishing emits only [`Signal::StoreDidReset`].
    pub fn begin_reset(&self) -> ResetGuard<'_> {
        self.emit(Signal::StoreWillReset);
        ResetGuard {
            bus: self,
            finished: false,
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use = "dropping the guard immediately ends the reset bracket"]
pub struct ResetGuard<'a> {
    bus: &'a SignalBus,
    finished: bool,
}

impl ResetGuard<'_> {
    pub fn finish(mut self) {
        self.finished = true;
        self.bus.emit(Signal::StoreDidReset);
        self.bus.emit(Signal::DataSynced);
    }
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.bus.emit(Signal::StoreDidReset);
        }
    }
}
