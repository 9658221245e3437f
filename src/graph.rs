//! Graph construction and coordinated start/stop.
//!
//! A [`PipelineGraph`] composes stages into a single linear chain: each
//! stage's output channel is the next stage's input channel. The graph owns
//! the channels for lifecycle purposes only: payloads never pass through
//! the graph itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channel::{BoundedChannel, ChannelStats};
use crate::control::{ControlBus, ControlSignal};
use crate::error::{Error, LinkSide, Result};
use crate::payload::Payload;
use crate::stage::{StageContext, StageLogic, StageRunner, StageState};

/// Configuration for pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How often a running stage checks the control bus. Also the receive
    /// timeout on the data path, so it bounds shutdown latency together
    /// with one `process` call's duration.
    pub control_poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            control_poll_interval: Duration::from_millis(100),
        }
    }
}

struct StageSlot<T: Send + 'static> {
    name: Arc<str>,
    logic: Option<Box<dyn StageLogic<Data = T>>>,
    input: Option<Arc<BoundedChannel<Payload<T>>>>,
    output: Option<Arc<BoundedChannel<Payload<T>>>>,
    state_rx: watch::Receiver<StageState>,
    state_tx: Option<watch::Sender<StageState>>,
}

/// A linear chain of stages and the channels between them.
///
/// Stages are appended with [`add_stage`] (insertion order is pipeline
/// order), wired with [`link`], launched as one unit with [`start`] and
/// wound down with [`stop`].
///
/// [`add_stage`]: PipelineGraph::add_stage
/// [`link`]: PipelineGraph::link
/// [`start`]: PipelineGraph::start
/// [`stop`]: PipelineGraph::stop
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use framepipe::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let mut graph = PipelineGraph::new();
///     graph.add_stage("numbers", RangeSource::new(0..100))?;
///     graph.add_stage("double", MapStage::new(|x: i64| x * 2))?;
///     graph.add_stage("print", framepipe::util::sink_fn(|p: Payload<i64>| async move {
///         println!("{}", p.data);
///         Ok(())
///     }))?;
///     graph.link("numbers", "double", 8)?;
///     graph.link("double", "print", 8)?;
///     graph.start()?;
///     graph.join(Duration::from_secs(5)).await
/// }
/// ```
pub struct PipelineGraph<T: Send + 'static> {
    config: PipelineConfig,
    stages: Vec<StageSlot<T>>,
    channels: Vec<Arc<BoundedChannel<Payload<T>>>>,
    bus: Arc<ControlBus>,
    sequence: Arc<AtomicU64>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl<T: Send + 'static> PipelineGraph<T> {
    /// Create an empty graph with default configuration.
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    /// Create an empty graph with the given configuration.
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            stages: Vec::new(),
            channels: Vec::new(),
            bus: Arc::new(ControlBus::new()),
            sequence: Arc::new(AtomicU64::new(0)),
            handles: Vec::new(),
            started: false,
        }
    }

    /// Set the control poll interval.
    pub fn control_poll_interval(mut self, interval: Duration) -> Self {
        self.config.control_poll_interval = interval;
        self
    }

    /// Append a stage to the chain.
    ///
    /// Fails with [`Error::DuplicateName`] if the name is taken, or
    /// [`Error::AlreadyStarted`] once the graph is running.
    pub fn add_stage<S, L>(&mut self, name: S, logic: L) -> Result<()>
    where
        S: Into<String>,
        L: StageLogic<Data = T> + 'static,
    {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let name: Arc<str> = Arc::from(name.into());
        if self.stages.iter().any(|s| s.name == name) {
            return Err(Error::DuplicateName {
                name: name.to_string(),
            });
        }

        let (state_tx, state_rx) = watch::channel(StageState::Idle);
        self.bus.register(name.to_string());
        self.stages.push(StageSlot {
            name,
            logic: Some(Box::new(logic)),
            input: None,
            output: None,
            state_rx,
            state_tx: Some(state_tx),
        });
        Ok(())
    }

    /// Create a bounded channel and wire it between two stages.
    ///
    /// The channel becomes the upstream stage's output and the downstream
    /// stage's input; both stages share the same instance.
    pub fn link(&mut self, upstream: &str, downstream: &str, capacity: usize) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }
        if upstream == downstream {
            return Err(Error::topology(format!(
                "stage `{upstream}` cannot be linked to itself"
            )));
        }

        let up = self.index_of(upstream)?;
        let down = self.index_of(downstream)?;
        if self.stages[up].output.is_some() {
            return Err(Error::AlreadyLinked {
                name: upstream.to_string(),
                side: LinkSide::Output,
            });
        }
        if self.stages[down].input.is_some() {
            return Err(Error::AlreadyLinked {
                name: downstream.to_string(),
                side: LinkSide::Input,
            });
        }

        let channel = Arc::new(BoundedChannel::named(
            capacity,
            format!("{upstream}->{downstream}"),
        ));
        self.stages[up].output = Some(channel.clone());
        self.stages[down].input = Some(channel.clone());
        self.channels.push(channel);
        Ok(())
    }

    /// Validate the chain and launch every stage.
    ///
    /// The chain must be non-empty, with the first stage as the single
    /// source, the last stage as the single sink, every interior stage
    /// wired on both sides, and adjacent stages sharing the same channel.
    /// On [`Error::InvalidTopology`] no stage is launched.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        self.validate_topology()?;

        for slot in &mut self.stages {
            let logic = slot.logic.take().expect("logic present before start");
            let state = slot.state_tx.take().expect("state sender present before start");
            let runner = StageRunner {
                name: slot.name.clone(),
                logic,
                input: slot.input.clone(),
                output: slot.output.clone(),
                bus: self.bus.clone(),
                ctx: StageContext::new(
                    slot.name.clone(),
                    self.sequence.clone(),
                    self.bus.shutdown_token(),
                ),
                state,
                poll_interval: self.config.control_poll_interval,
            };
            self.handles.push(tokio::spawn(runner.run()));
        }

        self.started = true;
        info!(stages = self.stages.len(), "pipeline started");
        Ok(())
    }

    /// Signal every stage to stop and wait for them to wind down.
    ///
    /// The `Stop` broadcast travels the control bus, so a full data channel
    /// cannot delay it. Stages still running after `timeout` are reported
    /// via [`Error::ShutdownTimeout`]; they are not force-killed.
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        info!("pipeline stop requested");
        self.bus.broadcast(ControlSignal::Stop);
        self.await_stopped(timeout).await
    }

    /// Wait for the pipeline to wind down on its own (source exhaustion).
    pub async fn join(&mut self, timeout: Duration) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.await_stopped(timeout).await
    }

    /// Queue a `Stop` signal for one stage.
    pub fn request_stop(&self, stage: &str) -> Result<()> {
        self.bus.send(stage, ControlSignal::Stop)
    }

    /// Broadcast a control signal to every stage.
    pub fn broadcast(&self, signal: ControlSignal) {
        self.bus.broadcast(signal);
    }

    /// Current lifecycle state of a stage.
    pub fn state(&self, stage: &str) -> Result<StageState> {
        let index = self.index_of(stage)?;
        Ok(*self.stages[index].state_rx.borrow())
    }

    /// Counter snapshots for every channel in the graph, in chain order.
    pub fn channel_stats(&self) -> Vec<(String, ChannelStats)> {
        self.channels
            .iter()
            .map(|c| (c.name().to_string(), c.stats()))
            .collect()
    }

    /// Payloads stamped so far in this run.
    pub fn sequence_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| &*s.name == name)
            .ok_or_else(|| Error::UnknownStage {
                name: name.to_string(),
            })
    }

    fn validate_topology(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::topology("graph has no stages"));
        }
        let last = self.stages.len() - 1;
        for (i, slot) in self.stages.iter().enumerate() {
            if i == 0 && slot.input.is_some() {
                return Err(Error::topology(format!(
                    "first stage `{}` must be the source but has an input channel",
                    slot.name
                )));
            }
            if i > 0 && slot.input.is_none() {
                return Err(Error::topology(format!(
                    "stage `{}` has no input channel",
                    slot.name
                )));
            }
            if i == last && slot.output.is_some() {
                return Err(Error::topology(format!(
                    "last stage `{}` must be the sink but has an output channel",
                    slot.name
                )));
            }
            if i < last && slot.output.is_none() {
                return Err(Error::topology(format!(
                    "stage `{}` has no output channel",
                    slot.name
                )));
            }
        }
        for pair in self.stages.windows(2) {
            let (up, down) = (&pair[0], &pair[1]);
            let linked = match (&up.output, &down.input) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            };
            if !linked {
                return Err(Error::topology(format!(
                    "stages `{}` and `{}` are adjacent but not linked to each other",
                    up.name, down.name
                )));
            }
        }
        Ok(())
    }

    async fn await_stopped(&mut self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut stragglers = Vec::new();

        for slot in &self.stages {
            let mut state_rx = slot.state_rx.clone();
            let stopped = tokio::time::timeout_at(
                deadline,
                state_rx.wait_for(|s| *s == StageState::Stopped),
            )
            .await;
            match stopped {
                // Err on the inner wait means the sender dropped without
                // reaching Stopped, i.e. a panicked stage.
                Ok(Ok(_)) => {}
                Ok(Err(_)) | Err(_) => stragglers.push(slot.name.to_string()),
            }
        }

        if !stragglers.is_empty() {
            warn!(stages = ?stragglers, "stages failed to stop in time");
            return Err(Error::ShutdownTimeout {
                timeout,
                stages: stragglers,
            });
        }

        let handles = std::mem::take(&mut self.handles);
        let _ = tokio::time::timeout_at(deadline, futures::future::join_all(handles)).await;
        info!("pipeline stopped");
        Ok(())
    }
}

impl<T: Send + 'static> Default for PipelineGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Drop for PipelineGraph<T> {
    fn drop(&mut self) {
        // Teardown: wake anything still parked on the data path and let the
        // stages observe end-of-stream or cancellation.
        for channel in &self.channels {
            channel.close();
        }
        self.bus.shutdown_token().cancel();
    }
}
