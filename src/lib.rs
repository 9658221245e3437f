//! # Bounded Multi-Stage Pipeline Runtime
//!
//! This crate provides a small pipeline runtime for live/streaming data:
//! independent processing stages, each on its own task, connected by
//! fixed-capacity channels that drop the oldest buffered payload when full.
//! Staleness is worse than loss: a stalled consumer never stalls its
//! producer.
//!
//! ## Core Concepts
//!
//! - **Payload**: the unit of data flowing through the pipeline
//! - **BoundedChannel**: fixed-capacity FIFO with drop-oldest overflow
//! - **StageLogic**: the per-payload processing contract stages implement
//! - **ControlBus**: out-of-band lifecycle signaling (stop, pause, flush)
//! - **PipelineGraph**: composes stages into a runnable linear chain
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use framepipe::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sink = CollectSink::new();
//!     let collected = sink.items();
//!
//!     let mut graph = PipelineGraph::new();
//!     graph.add_stage("frames", RangeSource::new(0..10))?;
//!     graph.add_stage("double", MapStage::new(|x: i64| x * 2))?;
//!     graph.add_stage("collect", sink)?;
//!     graph.link("frames", "double", 4)?;
//!     graph.link("double", "collect", 4)?;
//!
//!     graph.start()?;
//!     graph.join(Duration::from_secs(5)).await?;
//!
//!     println!("{:?}", collected.lock().await);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod control;
pub mod error;
pub mod graph;
pub mod payload;
pub mod stage;
pub mod stages;
pub mod util;

// Re-export commonly used items
pub mod prelude {
    pub use crate::channel::{BoundedChannel, ChannelStats, SendOutcome};
    pub use crate::control::{ControlBus, ControlSignal};
    pub use crate::error::{Error, Result, StageError, StageResult};
    pub use crate::graph::{PipelineConfig, PipelineGraph};
    pub use crate::payload::Payload;
    pub use crate::stage::{StageContext, StageLogic, StageState};
    pub use crate::stages::{
        CollectSink, CountSink, FilterStage, MapStage, Paced, RangeSource,
    };
    pub use crate::util::{sink_fn, source_fn, transform_fn};
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
