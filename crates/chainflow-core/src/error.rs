//! Error types for the chainflow pipeline.

use thiserror::Error;

use crate::context::ContextError;

/// Errors produced by pipeline stages, the worker pool and the batcher.
///
/// Stage wrappers (`Source`, `Handle`, `Send`, `Worker`) nest, so a handler
/// failure surfacing from [`Processor::run`](crate::Processor::run) reads as
/// `worker: handle: <cause>`.
#[derive(Debug, Error)]
pub enum FlowError {
    /// `Source::recv` failed.
    #[error("source: {0}")]
    Source(#[source] Box<FlowError>),

    /// `Handler::handle` failed.
    #[error("handle: {0}")]
    Handle(#[source] Box<FlowError>),

    /// `Destination::send` failed.
    #[error("send: {0}")]
    Send(#[source] Box<FlowError>),

    /// A worker terminated the pool.
    #[error("worker: {0}")]
    Worker(#[source] Box<FlowError>),

    /// The context was canceled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Invalid or incomplete configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A channel backing a source or destination was closed.
    #[error("channel closed: {0}")]
    Closed(String),

    /// Error raised by user code.
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Wrap an arbitrary error raised by a collaborator.
    pub fn external<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::External(Box::new(err))
    }

    /// The stage tag of the outermost wrapper, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Source(_) => Some("source"),
            Self::Handle(_) => Some("handle"),
            Self::Send(_) => Some("send"),
            Self::Worker(_) => Some("worker"),
            _ => None,
        }
    }

    /// The innermost error below all stage wrappers.
    pub fn root_cause(&self) -> &FlowError {
        match self {
            Self::Source(e) | Self::Handle(e) | Self::Send(e) | Self::Worker(e) => e.root_cause(),
            other => other,
        }
    }

    /// Returns `true` if the root cause is a deliberate cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self.root_cause(), Self::Context(ContextError::Canceled))
    }

    /// Returns `true` if the root cause is an expired deadline.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root_cause(), Self::Context(ContextError::DeadlineExceeded))
    }
}
