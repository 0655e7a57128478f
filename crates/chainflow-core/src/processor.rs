//! `Processor` — supervises a pool of recv → handle → send workers.
//!
//! ```text
//!                 ┌── worker 0: Source::recv → Handler::handle → Destination::send ──┐
//! Processor::run ─┼── worker 1: ...                                                  ├─► error channel (cap = N)
//!                 └── worker N-1: ...                                                ┘
//! ```
//!
//! Shutdown contract, asymmetric with the batcher on purpose:
//! - parent context canceled → clean shutdown, `run` returns `Ok(())`
//! - parent deadline exceeded → `run` returns the context error
//! - first worker error → pool is canceled, `run` returns `FlowError::Worker`
//! - worker panic → treated like a worker error (`worker: worker panicked`)
//!
//! In every case all workers have stopped before `run` returns.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::{Context, ContextError};
use crate::error::FlowError;
use crate::traits::{Destination, Handler, Source};

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Number of concurrent workers. Values below 1 are raised to 1.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

fn default_parallelism() -> usize { 1 }

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
        }
    }
}

/// Metrics snapshot for a processor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorMetrics {
    pub messages_received: u64,
    pub values_sent: u64,
    pub worker_failures: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    sent: AtomicU64,
    failures: AtomicU64,
}

/// Parallel pipeline supervisor.
pub struct Processor<I: Send + 'static, O: Send + 'static> {
    source: Arc<dyn Source<I>>,
    destination: Arc<dyn Destination<O>>,
    handler: Arc<dyn Handler<I, O>>,
    parallelism: usize,
    counters: Arc<Counters>,
}

impl<I: Send + 'static, O: Send + 'static> Processor<I, O> {
    pub fn builder() -> ProcessorBuilder<I, O> {
        ProcessorBuilder::default()
    }

    /// Build from loose collaborators and a config. Same validation as
    /// [`ProcessorBuilder::build`].
    pub fn new(parts: ProcessorParts<I, O>, config: ProcessorConfig) -> Result<Self, FlowError> {
        ProcessorBuilder {
            source: parts.source,
            destination: parts.destination,
            handler: parts.handler,
            config,
        }
        .build()
    }

    /// Number of workers `run` spawns.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> ProcessorMetrics {
        ProcessorMetrics {
            messages_received: self.counters.received.load(Ordering::Relaxed),
            values_sent: self.counters.sent.load(Ordering::Relaxed),
            worker_failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Run the pool until `ctx` terminates or a worker fails.
    pub async fn run(&self, ctx: &Context) -> Result<(), FlowError> {
        let ctx = ctx.child();
        let (err_tx, mut err_rx) = mpsc::channel::<FlowError>(self.parallelism);
        let mut workers = JoinSet::new();

        for id in 0..self.parallelism {
            let worker = self.worker(id);
            let ctx = ctx.clone();
            let err_tx = err_tx.clone();
            workers.spawn(async move {
                if let Err(e) = worker.handle(&ctx).await {
                    if !ctx.is_done() {
                        worker.counters.failures.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(worker = id, error = %e, "worker stopped");
                    // one slot per worker, never blocks
                    let _ = err_tx.try_send(e);
                }
            });
        }
        drop(err_tx);
        info!(parallelism = self.parallelism, "Processor started");

        let result = loop {
            tokio::select! {
                biased;
                _ = ctx.done() => break match ctx.err() {
                    Some(ContextError::DeadlineExceeded) => {
                        Err(ContextError::DeadlineExceeded.into())
                    }
                    _ => Ok(()),
                },
                // a worker that panics never reports through the channel
                Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                    Ok(()) => continue,
                    Err(e) => {
                        self.counters.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "worker panicked, stopping pool");
                        break Err(FlowError::Worker(Box::new(FlowError::Other(
                            "worker panicked".into(),
                        ))));
                    }
                },
                reported = err_rx.recv() => match reported {
                    Some(e) => {
                        warn!(error = %e, "worker failed, stopping pool");
                        break Err(FlowError::Worker(Box::new(e)));
                    }
                    None => break Err(FlowError::Other("all workers exited".into())),
                },
            }
        };

        ctx.cancel();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "worker task did not finish cleanly");
            }
        }
        info!(ok = result.is_ok(), "Processor stopped");
        result
    }

    fn worker(&self, id: usize) -> Worker<I, O> {
        Worker {
            id,
            source: Arc::clone(&self.source),
            destination: Arc::clone(&self.destination),
            handler: Arc::clone(&self.handler),
            counters: Arc::clone(&self.counters),
        }
    }
}

struct Worker<I: Send + 'static, O: Send + 'static> {
    id: usize,
    source: Arc<dyn Source<I>>,
    destination: Arc<dyn Destination<O>>,
    handler: Arc<dyn Handler<I, O>>,
    counters: Arc<Counters>,
}

impl<I: Send + 'static, O: Send + 'static> Worker<I, O> {
    /// Loop until a stage fails. Never returns `Ok`.
    async fn handle(&self, ctx: &Context) -> Result<(), FlowError> {
        loop {
            let (value, ack) = stage(ctx, self.source.recv(ctx))
                .await
                .map_err(|e| FlowError::Source(Box::new(e)))?;
            self.counters.received.fetch_add(1, Ordering::Relaxed);

            let values = stage(ctx, self.handler.handle(ctx, value))
                .await
                .map_err(|e| FlowError::Handle(Box::new(e)))?;

            let n = values.len() as u64;
            stage(ctx, self.destination.send(ctx, ack, values))
                .await
                .map_err(|e| FlowError::Send(Box::new(e)))?;
            self.counters.sent.fetch_add(n, Ordering::Relaxed);
            debug!(worker = self.id, values = n, "message processed");
        }
    }
}

/// Run one blocking stage call, giving up as soon as `ctx` terminates.
async fn stage<T>(
    ctx: &Context,
    fut: impl Future<Output = Result<T, FlowError>>,
) -> Result<T, FlowError> {
    ctx.until_done(fut).await?
}

/// Collaborators for [`Processor::new`]. Every field is required.
pub struct ProcessorParts<I: Send + 'static, O: Send + 'static> {
    pub source: Option<Arc<dyn Source<I>>>,
    pub destination: Option<Arc<dyn Destination<O>>>,
    pub handler: Option<Arc<dyn Handler<I, O>>>,
}

impl<I: Send + 'static, O: Send + 'static> Default for ProcessorParts<I, O> {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            handler: None,
        }
    }
}

/// Builder for [`Processor`].
pub struct ProcessorBuilder<I: Send + 'static, O: Send + 'static> {
    source: Option<Arc<dyn Source<I>>>,
    destination: Option<Arc<dyn Destination<O>>>,
    handler: Option<Arc<dyn Handler<I, O>>>,
    config: ProcessorConfig,
}

impl<I: Send + 'static, O: Send + 'static> Default for ProcessorBuilder<I, O> {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            handler: None,
            config: ProcessorConfig::default(),
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> ProcessorBuilder<I, O> {
    pub fn source(mut self, source: Arc<dyn Source<I>>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn destination(mut self, destination: Arc<dyn Destination<O>>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler<I, O>>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Processor<I, O>, FlowError> {
        let (source, destination) = match (self.source, self.destination) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                return Err(FlowError::Config(
                    "both source and destination required".into(),
                ))
            }
        };
        let handler = self.handler.ok_or_else(|| {
            FlowError::Config("handler required, consider Pipe for identity handling".into())
        })?;

        Ok(Processor {
            source,
            destination,
            handler,
            parallelism: self.config.parallelism.max(1),
            counters: Arc::new(Counters::default()),
        })
    }
}
