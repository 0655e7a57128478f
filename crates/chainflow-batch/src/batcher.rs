//! `Batcher` — a `Destination` that groups messages into batches.
//!
//! `send` pushes each value into a bounded queue; `run` drains the queue into
//! the pending batch and hands it to the [`BatchSink`] when either
//! `flush_length` messages are buffered or `flush_frequency` has passed since
//! the first message of the batch arrived.
//!
//! Per batch window:
//! ```text
//! EMPTY ──first msg, arm timer──► ACCUMULATING ──length | timer──► FLUSHING ──ok──► EMPTY
//!                                                                     │
//!                                                          sink error | ctx done ──► TERMINATED
//! ```
//!
//! Unlike [`Processor::run`](chainflow_core::Processor::run), `run` reports
//! context cancellation as an error: a batch pending at cancellation is
//! dropped un-acked and the caller must know about it.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use chainflow_core::{Ack, AckChain, Context, ContextError, Destination, FlowError, Message};

use crate::config::BatcherConfig;
use crate::sink::BatchSink;

/// Metrics snapshot for a batcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherMetrics {
    pub batches_flushed: u64,
    pub messages_flushed: u64,
    pub flush_failures: u64,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    messages: AtomicU64,
    failures: AtomicU64,
}

/// Batching destination with chained acknowledgments.
///
/// Share it as `Arc<Batcher<T>>`: one clone drives [`Batcher::run`], the
/// others are handed to producers as `Arc<dyn Destination<T>>`.
pub struct Batcher<T: Send + Sync + 'static> {
    config: BatcherConfig,
    sink: Arc<dyn BatchSink<T>>,
    tx: mpsc::Sender<Message<T>>,
    rx: Mutex<mpsc::Receiver<Message<T>>>,
    counters: Counters,
}

impl<T: Send + Sync + 'static> Batcher<T> {
    pub fn new(sink: Arc<dyn BatchSink<T>>, config: BatcherConfig) -> Self {
        let config = config.normalized();
        let capacity = config.buffer_size.unwrap_or(config.flush_length);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            config,
            sink,
            tx,
            rx: Mutex::new(rx),
            counters: Counters::default(),
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics(&self) -> BatcherMetrics {
        BatcherMetrics {
            batches_flushed: self.counters.batches.load(Ordering::Relaxed),
            messages_flushed: self.counters.messages.load(Ordering::Relaxed),
            flush_failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Drain the queue into batches until `ctx` terminates or a flush fails.
    ///
    /// Always returns an error: the sink's error, or the context error on
    /// cancellation. Only one `run` may be active at a time.
    pub async fn run(&self, ctx: &Context) -> Result<(), FlowError> {
        let mut rx = self
            .rx
            .try_lock()
            .map_err(|_| FlowError::Config("batcher is already running".into()))?;

        let flush_length = self.config.flush_length;
        let frequency = self.config.flush_frequency();
        let mut batch: Vec<Message<T>> = Vec::with_capacity(flush_length);
        // armed when the first message of a window arrives
        let mut deadline: Option<Pin<Box<Sleep>>> = None;

        info!(
            flush_length,
            flush_frequency_ms = self.config.flush_frequency_ms,
            "Batcher started"
        );

        loop {
            tokio::select! {
                biased;

                _ = ctx.done() => {
                    let err = ctx.err().unwrap_or(ContextError::Canceled);
                    info!(pending = batch.len(), error = %err, "Batcher stopped");
                    return Err(err.into());
                }

                _ = async {
                    if let Some(d) = &mut deadline {
                        d.as_mut().await
                    }
                }, if deadline.is_some() => {
                    debug!(batch_len = batch.len(), "Flush frequency reached");
                    deadline = None;
                    self.flush(ctx, &mut batch).await?;
                }

                received = rx.recv() => {
                    let Some(msg) = received else {
                        return Err(FlowError::Closed("batcher queue".into()));
                    };
                    if batch.is_empty() {
                        deadline = frequency.map(|f| Box::pin(tokio::time::sleep(f)));
                    }
                    batch.push(msg);
                    if batch.len() >= flush_length {
                        deadline = None;
                        self.flush(ctx, &mut batch).await?;
                    }
                }
            }
        }
    }

    /// Write `batch` to the sink and ack every message on success.
    async fn flush(&self, ctx: &Context, batch: &mut Vec<Message<T>>) -> Result<(), FlowError> {
        let len = batch.len();
        if len == 0 {
            return Ok(());
        }

        match ctx.until_done(self.sink.flush(ctx, batch.as_slice())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(batch_len = len, error = %e, "Flush failed, dropping batch");
                return Err(e);
            }
            Err(cause) => {
                info!(batch_len = len, error = %cause, "Flush interrupted, dropping batch");
                return Err(cause.into());
            }
        }

        for msg in batch.drain(..) {
            msg.ack();
        }
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters.messages.fetch_add(len as u64, Ordering::Relaxed);
        debug!(batch_len = len, "Batch flushed");
        Ok(())
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Destination<T> for Batcher<T> {
    /// Enqueue `values` under one chained ack.
    ///
    /// `ack` fires once every value has been part of a successful flush, or
    /// immediately when `values` is empty. Blocks while the queue is full.
    async fn send(&self, ctx: &Context, ack: Ack, values: Vec<T>) -> Result<(), FlowError> {
        let chain = AckChain::new(ack, values.len());
        for value in values {
            let msg = Message::with_ack(value, Arc::clone(&chain));
            ctx.until_done(self.tx.send(msg))
                .await?
                .map_err(|_| FlowError::Closed("batcher queue".into()))?;
        }
        Ok(())
    }
}
