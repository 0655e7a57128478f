//! In-memory `Source` / `Destination` backed by Tokio channels.
//!
//! Useful for tests and for wiring pipelines inside one process.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::context::Context;
use crate::error::FlowError;
use crate::message::Ack;
use crate::traits::{Destination, Source};

/// [`Source`] reading `(value, ack)` pairs from an mpsc channel.
///
/// Workers share the receiver; each `recv` hands out one pair. Once every
/// sender is dropped and the channel is drained, `recv` fails with
/// [`FlowError::Closed`].
pub struct ChannelSource<T> {
    rx: Mutex<mpsc::Receiver<(T, Ack)>>,
}

impl<T: Send + 'static> ChannelSource<T> {
    pub fn new(rx: mpsc::Receiver<(T, Ack)>) -> Self {
        Self { rx: Mutex::new(rx) }
    }

    /// Create a bounded channel and the source reading from it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<(T, Ack)>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl<T: Send + 'static> Source<T> for ChannelSource<T> {
    async fn recv(&self, ctx: &Context) -> Result<(T, Ack), FlowError> {
        let mut rx = ctx.until_done(self.rx.lock()).await?;
        ctx.until_done(rx.recv())
            .await?
            .ok_or_else(|| FlowError::Closed("source channel".into()))
    }
}

/// [`Destination`] forwarding each value into an mpsc channel.
///
/// The ack fires once every value of a `send` call was accepted by the channel.
pub struct ChannelDestination<T> {
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> ChannelDestination<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    /// Create a bounded channel and the destination writing into it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl<T: Send + 'static> Destination<T> for ChannelDestination<T> {
    async fn send(&self, ctx: &Context, ack: Ack, values: Vec<T>) -> Result<(), FlowError> {
        for value in values {
            ctx.until_done(self.tx.send(value))
                .await?
                .map_err(|_| FlowError::Closed("destination channel".into()))?;
        }
        ack.ack();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Processor;
    use crate::traits::handler_fn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn source_reports_closed_channel() {
        let (tx, src) = ChannelSource::<u8>::channel(1);
        tx.send((7, Ack::noop())).await.unwrap();
        drop(tx);

        let ctx = Context::background();
        assert_eq!(src.recv(&ctx).await.unwrap().0, 7);
        let err = src.recv(&ctx).await.unwrap_err();
        assert!(matches!(err, FlowError::Closed(_)));
    }

    #[tokio::test]
    async fn blocked_send_observes_cancellation() {
        let (dst, _rx) = ChannelDestination::<u8>::channel(1);
        let ctx = Context::background();
        let acked = Arc::new(AtomicU32::new(0));
        let a = acked.clone();

        let pending = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                let ack = Ack::new(move || {
                    a.fetch_add(1, Ordering::SeqCst);
                });
                dst.send(&ctx, ack, vec![1, 2]).await
            }
        });
        tokio::task::yield_now().await;
        ctx.cancel();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(acked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn channel_pipeline_acks_every_message() {
        let (input, src) = ChannelSource::<u32>::channel(16);
        let (dst, mut output) = ChannelDestination::<u32>::channel(16);
        let double = handler_fn(|_ctx: Context, v: u32| async move {
            Ok::<_, FlowError>(vec![v, v])
        });

        let processor = Processor::<u32, u32>::builder()
            .source(Arc::new(src))
            .destination(Arc::new(dst))
            .handler(Arc::new(double))
            .build()
            .unwrap();

        let acked = Arc::new(AtomicU32::new(0));
        for v in 0..4 {
            let a = acked.clone();
            let ack = Ack::new(move || {
                a.fetch_add(1, Ordering::SeqCst);
            });
            input.send((v, ack)).await.unwrap();
        }
        drop(input);

        // the drained source closes the channel, which ends the pool
        let err = processor.run(&Context::background()).await.unwrap_err();
        assert!(matches!(err.root_cause(), FlowError::Closed(_)));
        assert_eq!(acked.load(Ordering::SeqCst), 4);

        let mut seen = Vec::new();
        while let Ok(v) = output.try_recv() {
            seen.push(v);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }
}
