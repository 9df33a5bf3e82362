//! Live data and event streams published by the supervisor.
//!
//! Hosts subscribe with [`EventHub::subscribe`] and receive packets on a
//! plain `mpsc` channel; dead receivers are pruned on the next emit. The
//! packet stream carries everything a live display needs, the event stream
//! carries unlock notifications.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::data::Trace;
use crate::supervisor::LockState;

/// One packet on the live-display stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LockPacket {
    /// A fresh free-running sweep trace.
    Sweep { trace: Trace },
    /// One point of an in-progress locator scan.
    Scan {
        index: usize,
        total: usize,
        offset: f64,
        trace: Trace,
    },
    /// A supervisor state change or progress note.
    Status { state: LockState, detail: String },
}

/// Fan-out hub: every subscriber gets a clone of every emitted value.
#[derive(Clone)]
pub struct EventHub<T: Clone> {
    inner: Arc<Mutex<Vec<Sender<T>>>>,
}

impl<T: Clone> EventHub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to the stream. Dropping the receiver unsubscribes on the
    /// next emit.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = std::sync::mpsc::channel();
        if let Ok(mut subs) = self.inner.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Send `value` to all live subscribers, pruning closed channels.
    pub fn emit(&self, value: T) {
        if let Ok(mut subs) = self.inner.lock() {
            subs.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }

    /// Number of live subscribers as of the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<T: Clone> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}
