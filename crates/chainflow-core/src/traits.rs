//! Collaborator traits consumed by the [`Processor`](crate::Processor).
//!
//! All traits are object-safe and stored as `Arc<dyn ...>`; implementations
//! must be `Send + Sync` because every worker of a pool shares them.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::FlowError;
use crate::message::Ack;

/// Produces values together with their acknowledgment handles.
#[async_trait]
pub trait Source<T: Send + 'static>: Send + Sync {
    /// Block until the next value is available.
    ///
    /// Must return promptly once `ctx` terminates.
    async fn recv(&self, ctx: &Context) -> Result<(T, Ack), FlowError>;
}

/// Accepts values tied to one logical acknowledgment.
#[async_trait]
pub trait Destination<T: Send + 'static>: Send + Sync {
    /// Accept `values`. `ack` must fire once all of them are durable.
    ///
    /// May block to apply backpressure; must return once `ctx` terminates.
    async fn send(&self, ctx: &Context, ack: Ack, values: Vec<T>) -> Result<(), FlowError>;
}

/// Transforms one input value into zero or more output values.
#[async_trait]
pub trait Handler<I: Send + 'static, O: Send + 'static>: Send + Sync {
    async fn handle(&self, ctx: &Context, value: I) -> Result<Vec<O>, FlowError>;
}

/// Identity handler: forwards every value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pipe;

#[async_trait]
impl<T: Send + 'static> Handler<T, T> for Pipe {
    async fn handle(&self, _ctx: &Context, value: T) -> Result<Vec<T>, FlowError> {
        Ok(vec![value])
    }
}

/// [`Handler`] backed by an async closure. See [`handler_fn`].
pub struct HandlerFn<F, I, O> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

/// Build a handler from `Fn(Context, I) -> impl Future<Output = Result<Vec<O>, FlowError>>`.
///
/// ```
/// use chainflow_core::{handler_fn, Context, FlowError};
///
/// let upper = handler_fn(|_ctx: Context, s: String| async move {
///     Ok::<_, FlowError>(vec![s.to_uppercase()])
/// });
/// # let _ = upper;
/// ```
pub fn handler_fn<F, Fut, I, O>(f: F) -> HandlerFn<F, I, O>
where
    F: Fn(Context, I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<O>, FlowError>> + Send + 'static,
{
    HandlerFn {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, I, O> Handler<I, O> for HandlerFn<F, I, O>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(Context, I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<O>, FlowError>> + Send + 'static,
{
    async fn handle(&self, ctx: &Context, value: I) -> Result<Vec<O>, FlowError> {
        (self.f)(ctx.clone(), value).await
    }
}
