//! Error types for the pipeline runtime.

use std::sync::Arc;
use std::time::Duration;

/// Which side of a stage a channel attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    /// The stage's input channel.
    Input,
    /// The stage's output channel.
    Output,
}

impl std::fmt::Display for LinkSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSide::Input => write!(f, "input"),
            LinkSide::Output => write!(f, "output"),
        }
    }
}

/// The main error type for the pipeline runtime.
///
/// Construction errors (`DuplicateName`, `UnknownStage`, `AlreadyLinked`,
/// `InvalidTopology`, `InvalidCapacity`, `AlreadyStarted`) surface
/// synchronously to the graph builder and abort construction.
/// `ShutdownTimeout` is returned, never raised, by [`PipelineGraph::stop`].
///
/// [`PipelineGraph::stop`]: crate::graph::PipelineGraph::stop
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A send was attempted on a closed channel.
    #[error("send on closed channel")]
    ChannelClosed,

    /// A stage name is already registered in the graph.
    #[error("stage `{name}` is already registered")]
    DuplicateName {
        /// The conflicting stage name.
        name: String,
    },

    /// A stage name is not registered in the graph.
    #[error("unknown stage `{name}`")]
    UnknownStage {
        /// The name that failed to resolve.
        name: String,
    },

    /// A stage already has a channel wired on the requested side.
    #[error("stage `{name}` already has an {side} channel")]
    AlreadyLinked {
        /// The stage that is already wired.
        name: String,
        /// The side that was already assigned.
        side: LinkSide,
    },

    /// The graph does not form a runnable linear chain.
    #[error("invalid topology: {reason}")]
    InvalidTopology {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// A channel capacity of zero was requested.
    #[error("channel capacity must be positive")]
    InvalidCapacity,

    /// The graph was already started.
    #[error("pipeline already started")]
    AlreadyStarted,

    /// One or more stages failed to reach `Stopped` within the deadline.
    #[error("stages did not stop within {timeout:?}: {stages:?}")]
    ShutdownTimeout {
        /// The deadline that elapsed.
        timeout: Duration,
        /// Names of the stages still not stopped.
        stages: Vec<String>,
    },
}

impl Error {
    pub(crate) fn topology<S: Into<String>>(reason: S) -> Self {
        Error::InvalidTopology {
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised by a stage's `process` or `flush` body.
///
/// Recoverable errors are logged by the run loop and the offending payload
/// is dropped; fatal errors stop the stage, which downstream observes as
/// normal end-of-stream.
#[derive(Debug, Clone)]
pub struct StageError {
    source: Arc<dyn std::error::Error + Send + Sync>,
    fatal: bool,
}

impl StageError {
    /// Wrap an error the run loop should log and move past.
    pub fn recoverable<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self {
            source: Arc::new(error),
            fatal: false,
        }
    }

    /// Wrap an error that must stop the stage.
    pub fn fatal<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self {
            source: Arc::new(error),
            fatal: true,
        }
    }

    /// Create a recoverable error from a message.
    pub fn msg<S: Into<String>>(message: S) -> Self {
        Self::recoverable(Message(message.into()))
    }

    /// Mark this error fatal.
    pub fn into_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    /// Whether the run loop must stop the stage.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<String> for StageError {
    fn from(s: String) -> Self {
        StageError::msg(s)
    }
}

impl From<&str> for StageError {
    fn from(s: &str) -> Self {
        StageError::msg(s)
    }
}

#[derive(Debug)]
struct Message(String);

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Message {}

/// Result alias for stage logic bodies.
pub type StageResult<T> = std::result::Result<T, StageError>;
