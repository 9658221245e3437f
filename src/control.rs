//! Out-of-band lifecycle signaling.
//!
//! The control bus is a separate path from the data channels so that a full
//! input queue never delays shutdown: a `Stop` broadcast at time T is
//! observed by every stage within one control poll interval of T, however
//! backed up the data path is.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A lifecycle signal delivered outside the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlSignal {
    /// Exit the run loop at the next poll point.
    Stop,
    /// Suspend pulling input until `Resume`.
    Pause,
    /// Resume a paused stage.
    Resume,
    /// Emit internally buffered payloads downstream.
    Flush,
}

/// Delivers lifecycle signals to registered stages.
///
/// Signals are queued per stage in FIFO order; stages drain their queue with
/// [`poll`] once per run-loop iteration. A `Stop` broadcast additionally
/// cancels the shared shutdown token so long-running `process` bodies can
/// observe shutdown without waiting for their next poll point.
///
/// [`poll`]: ControlBus::poll
#[derive(Debug)]
pub struct ControlBus {
    pending: Mutex<HashMap<String, VecDeque<ControlSignal>>>,
    shutdown: CancellationToken,
}

impl ControlBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a stage so broadcasts reach it.
    pub fn register<S: Into<String>>(&self, stage: S) {
        self.pending
            .lock()
            .unwrap()
            .entry(stage.into())
            .or_default();
    }

    /// Enqueue a signal for every registered stage.
    pub fn broadcast(&self, signal: ControlSignal) {
        let mut pending = self.pending.lock().unwrap();
        for queue in pending.values_mut() {
            queue.push_back(signal);
        }
        drop(pending);

        if signal == ControlSignal::Stop {
            self.shutdown.cancel();
        }
    }

    /// Enqueue a signal for a single stage.
    pub fn send(&self, stage: &str, signal: ControlSignal) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        match pending.get_mut(stage) {
            Some(queue) => {
                queue.push_back(signal);
                Ok(())
            }
            None => Err(Error::UnknownStage {
                name: stage.to_string(),
            }),
        }
    }

    /// Non-blocking check for the next pending signal.
    pub fn poll(&self, stage: &str) -> Option<ControlSignal> {
        self.pending
            .lock()
            .unwrap()
            .get_mut(stage)
            .and_then(VecDeque::pop_front)
    }

    /// Token cancelled once `Stop` has been broadcast.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}
