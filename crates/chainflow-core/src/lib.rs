//! chainflow-core — foundation types for ChainFlow message pipelines.
//!
//! # Architecture
//!
//! ```text
//! Processor::run (N workers, one shared Context)
//!      │
//!      ├── Source::recv        → (value, Ack)
//!      ├── Handler::handle     → Vec<value>
//!      └── Destination::send   → e.g. chainflow-batch::Batcher
//! ```
//!
//! The crate defines:
//!
//! - [`Context`] — cancelable lifetime with a recorded termination cause
//! - [`Ack`] / [`AckChain`] / [`Message`] — at-least-once acknowledgment plumbing
//! - [`Source`], [`Handler`], [`Destination`] — collaborator traits
//! - [`Processor`] — the worker-pool supervisor
//! - [`FlowError`] — structured error type shared by all ChainFlow crates
//! - [`memory`] module — channel-backed source and destination

pub mod context;
pub mod error;
pub mod memory;
pub mod message;
pub mod processor;
pub mod traits;

pub use context::{Context, ContextError};
pub use error::FlowError;
pub use memory::{ChannelDestination, ChannelSource};
pub use message::{Ack, AckChain, Message};
pub use processor::{
    Processor, ProcessorBuilder, ProcessorConfig, ProcessorMetrics, ProcessorParts,
};
pub use traits::{handler_fn, Destination, Handler, HandlerFn, Pipe, Source};
