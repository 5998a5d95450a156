//! Single-flight coordination: at most one synthesis per fingerprint.

use crate::blob::AudioBlob;
use crate::cache::key::Fingerprint;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Clonable error form delivered to waiters. Producer failures are
/// per-sentence synthesis failures, which are always recoverable.
#[derive(Debug, Clone)]
pub struct SharedSynthError {
    pub message: String,
}

pub type FlightOutcome = std::result::Result<AudioBlob, SharedSynthError>;

/// Role assigned to a caller for a given key.
pub enum Ticket {
    /// This caller runs the producer and must call [`FlightTable::finish`].
    Producer(broadcast::Sender<FlightOutcome>),
    /// Another caller is producing; await the broadcast.
    Waiter(broadcast::Receiver<FlightOutcome>),
}

/// Table of in-flight keys to one-shot broadcast channels.
#[derive(Default)]
pub struct FlightTable {
    inner: Mutex<HashMap<Fingerprint, broadcast::Sender<FlightOutcome>>>,
}

impl FlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`: attach as a waiter when a producer is
    /// already running, otherwise claim the producer role.
    pub fn join(&self, key: Fingerprint) -> Ticket {
        let mut table = match self.inner.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(tx) = table.get(&key) {
            return Ticket::Waiter(tx.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        table.insert(key, tx.clone());
        Ticket::Producer(tx)
    }

    /// Publish the outcome to all waiters and retire the flight. The
    /// removal happens under the same lock that admits waiters, so no
    /// waiter can subscribe after the result is sent.
    pub fn finish(&self, key: &Fingerprint, tx: &broadcast::Sender<FlightOutcome>, outcome: FlightOutcome) {
        let mut table = match self.inner.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.remove(key);
        let _ = tx.send(outcome);
    }

    /// Number of flights currently in progress.
    pub fn in_flight(&self) -> usize {
        match self.inner.lock() {
            Ok(t) => t.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
