//! `BatchSink` trait — where completed batches are written.

use async_trait::async_trait;
use chainflow_core::{Context, FlowError, Message};

/// Receives every completed batch from a [`Batcher`](crate::Batcher).
///
/// Returning `Ok` marks the whole batch durable; the batcher then acks each
/// message. Returning `Err` stops the batcher and no message of the batch is
/// acked. Implementations should return promptly once `ctx` terminates.
#[async_trait]
pub trait BatchSink<T: Send + Sync + 'static>: Send + Sync {
    async fn flush(&self, ctx: &Context, batch: &[Message<T>]) -> Result<(), FlowError>;
}
