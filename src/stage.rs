//! The stage contract and its run loop.
//!
//! A stage is an independent unit of processing with at most one input and
//! one output channel. Application code implements [`StageLogic`]; the
//! runtime wraps it in a run loop that adapts the per-payload contract to
//! the channel transport and the control bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::BoundedChannel;
use crate::control::{ControlBus, ControlSignal};
use crate::error::StageResult;
use crate::payload::Payload;

/// Lifecycle state of a stage.
///
/// `Idle → Running → Stopping → Stopped`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StageState {
    /// Created but not yet started.
    Idle,
    /// The run loop is executing.
    Running,
    /// A stop signal, end-of-stream or fatal error was observed; the loop
    /// is winding down.
    Stopping,
    /// The execution context has exited cleanly.
    Stopped,
}

/// Per-stage handle to graph-owned services.
///
/// Passed to [`StageLogic::process`] on every call. Cloning is cheap; all
/// state is shared with the owning graph. This is the only way stage code
/// reaches the sequence counter; there is no process-wide registry.
#[derive(Debug, Clone)]
pub struct StageContext {
    name: Arc<str>,
    sequence: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl StageContext {
    pub(crate) fn new(name: Arc<str>, sequence: Arc<AtomicU64>, shutdown: CancellationToken) -> Self {
        Self {
            name,
            sequence,
            shutdown,
        }
    }

    /// The owning stage's name.
    pub fn stage_name(&self) -> &str {
        &self.name
    }

    /// Claim the next sequence id from the graph's counter.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Stamp a new payload originating at this stage.
    pub fn payload<T>(&self, data: T) -> Payload<T> {
        Payload::stamped(self.next_sequence(), self.name.clone(), data)
    }

    /// Token cancelled once a graph-wide `Stop` has been broadcast.
    ///
    /// Long-running `process` bodies should chunk their work and check this
    /// between chunks so shutdown stays prompt.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// The per-payload processing contract implemented by concrete stages.
///
/// A stage's role is decided by its wiring, not its type: a stage with no
/// input channel is a source and receives `None`; a stage with no output
/// channel is a sink and its results are discarded.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use framepipe::prelude::*;
///
/// struct Threshold {
///     limit: i64,
/// }
///
/// #[async_trait]
/// impl StageLogic for Threshold {
///     type Data = i64;
///
///     async fn process(
///         &mut self,
///         _ctx: &StageContext,
///         input: Option<Payload<i64>>,
///     ) -> StageResult<Option<Payload<i64>>> {
///         let payload = input.expect("wired as a transform");
///         if payload.data > self.limit {
///             Ok(None) // drop, do not forward
///         } else {
///             Ok(Some(payload))
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait StageLogic: Send {
    /// The application data type carried by this pipeline's payloads.
    type Data: Send + 'static;

    /// Process one payload.
    ///
    /// `input` is `None` when the stage is wired as a source; a source
    /// returning `Ok(None)` is exhausted and triggers end-of-stream. A stage
    /// with input returning `Ok(None)` drops the payload without forwarding.
    ///
    /// Must not block indefinitely: long-running work should be chunked so
    /// control signals are observed promptly (see
    /// [`StageContext::shutdown`]).
    async fn process(
        &mut self,
        ctx: &StageContext,
        input: Option<Payload<Self::Data>>,
    ) -> StageResult<Option<Payload<Self::Data>>>;

    /// Emit internally buffered payloads.
    ///
    /// Invoked on a `Flush` signal and once at end-of-stream before the
    /// output channel closes.
    async fn flush(&mut self, ctx: &StageContext) -> StageResult<Vec<Payload<Self::Data>>> {
        let _ = ctx;
        Ok(vec![])
    }
}

pub(crate) struct StageRunner<T: Send + 'static> {
    pub(crate) name: Arc<str>,
    pub(crate) logic: Box<dyn StageLogic<Data = T>>,
    pub(crate) input: Option<Arc<BoundedChannel<Payload<T>>>>,
    pub(crate) output: Option<Arc<BoundedChannel<Payload<T>>>>,
    pub(crate) bus: Arc<ControlBus>,
    pub(crate) ctx: StageContext,
    pub(crate) state: watch::Sender<StageState>,
    pub(crate) poll_interval: Duration,
}

impl<T: Send + 'static> StageRunner<T> {
    pub(crate) async fn run(mut self) {
        self.state.send_replace(StageState::Running);
        info!(stage = %self.name, "stage running");

        let mut paused = false;
        // End-of-stream exits drain buffered state downstream; stop and
        // fatal-error exits favor promptness and do not.
        let mut drain_on_exit = false;

        'run: loop {
            // A source whose process body is always ready would otherwise
            // never yield; correctness must hold on a single-core
            // cooperative scheduler.
            tokio::task::yield_now().await;

            // Control first, so a stop queued before the first payload is
            // honored without touching the data path.
            while let Some(signal) = self.bus.poll(&self.name) {
                match signal {
                    ControlSignal::Stop => {
                        debug!(stage = %self.name, "stop signal observed");
                        break 'run;
                    }
                    ControlSignal::Pause => paused = true,
                    ControlSignal::Resume => paused = false,
                    ControlSignal::Flush => self.flush_downstream().await,
                }
            }

            if paused {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let input = match &self.input {
                Some(channel) => match channel.recv(self.poll_interval).await {
                    Some(payload) => Some(payload),
                    None if channel.is_closed() && channel.is_empty() => {
                        debug!(stage = %self.name, "upstream end-of-stream");
                        drain_on_exit = true;
                        break 'run;
                    }
                    // Receive timed out; loop back to the control poll.
                    None => continue,
                },
                None => None,
            };

            let is_source = self.input.is_none();
            let sequence_id = input.as_ref().map(|p| p.sequence_id);

            match self.logic.process(&self.ctx, input).await {
                Ok(Some(payload)) => self.forward(payload),
                Ok(None) if is_source => {
                    debug!(stage = %self.name, "source exhausted");
                    drain_on_exit = true;
                    break 'run;
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!(stage = %self.name, sequence_id, error = %e, "fatal processing error");
                    break 'run;
                }
                Err(e) => {
                    warn!(stage = %self.name, sequence_id, error = %e, "processing error, payload dropped");
                }
            }
        }

        self.state.send_replace(StageState::Stopping);
        if drain_on_exit {
            self.flush_downstream().await;
        }
        if let Some(output) = &self.output {
            output.close();
        }
        self.state.send_replace(StageState::Stopped);
        info!(stage = %self.name, "stage stopped");
    }

    async fn flush_downstream(&mut self) {
        match self.logic.flush(&self.ctx).await {
            Ok(payloads) => {
                for payload in payloads {
                    self.forward(payload);
                }
            }
            Err(e) => {
                warn!(stage = %self.name, error = %e, "flush error");
            }
        }
    }

    fn forward(&self, payload: Payload<T>) {
        let Some(output) = &self.output else {
            // Sink stage: the payload's life ends here.
            return;
        };
        let sequence_id = payload.sequence_id;
        match output.send(payload) {
            Ok(outcome) if outcome.dropped_oldest() => {
                debug!(
                    stage = %self.name,
                    channel = output.name(),
                    "downstream full, oldest payload dropped"
                );
            }
            Ok(_) => {}
            Err(_) => {
                // Downstream already tore down; end-of-stream is imminent.
                warn!(stage = %self.name, sequence_id, "send on closed output channel");
            }
        }
    }
}
