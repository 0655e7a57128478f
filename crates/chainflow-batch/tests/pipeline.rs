//! End-to-end tests: Processor workers feeding a Batcher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chainflow_batch::{BatchSink, Batcher, BatcherConfig};
use chainflow_core::{
    handler_fn, Ack, ChannelSource, Context, Destination, FlowError, Message, Processor,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Collect {
    batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl BatchSink<String> for Collect {
    async fn flush(&self, _ctx: &Context, batch: &[Message<String>]) -> Result<(), FlowError> {
        self.batches
            .lock()
            .unwrap()
            .push(batch.iter().map(|m| m.value.clone()).collect());
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl BatchSink<String> for Broken {
    async fn flush(&self, _ctx: &Context, _batch: &[Message<String>]) -> Result<(), FlowError> {
        Err(FlowError::Other("warehouse offline".into()))
    }
}

fn counting_ack(count: &Arc<AtomicU32>) -> Ack {
    let count = count.clone();
    Ack::new(move || {
        count.fetch_add(1, Ordering::SeqCst);
    })
}

async fn wait_until(count: &AtomicU32, expected: u32) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while count.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("acks did not arrive in time");
}

#[tokio::test]
async fn processor_into_batcher_acks_every_source_message() {
    init_tracing();

    let sink = Arc::new(Collect::default());
    let config = BatcherConfig::default()
        .with_flush_length(8)
        .with_flush_frequency(Duration::from_millis(10));
    let batcher = Arc::new(Batcher::<String>::new(sink.clone(), config));

    let (input, source) = ChannelSource::<u32>::channel(32);
    let fan_out = handler_fn(|_ctx: Context, v: u32| async move {
        Ok::<_, FlowError>(vec![format!("{v}"), format!("{v}!")])
    });
    let processor = Arc::new(
        Processor::<u32, String>::builder()
            .source(Arc::new(source))
            .destination(batcher.clone())
            .handler(Arc::new(fan_out))
            .parallelism(4)
            .build()
            .unwrap(),
    );

    // one parent context stops both components together
    let root = Context::background();
    let batcher_run = tokio::spawn({
        let batcher = batcher.clone();
        let ctx = root.child();
        async move { batcher.run(&ctx).await }
    });
    let processor_run = tokio::spawn({
        let processor = processor.clone();
        let ctx = root.child();
        async move { processor.run(&ctx).await }
    });

    let acked = Arc::new(AtomicU32::new(0));
    for v in 0..20 {
        input.send((v, counting_ack(&acked))).await.unwrap();
    }
    wait_until(&acked, 20).await;

    root.cancel();
    let processor_result = processor_run.await.unwrap();
    assert!(processor_result.is_ok(), "unexpected error: {processor_result:?}");
    let batcher_err = batcher_run.await.unwrap().unwrap_err();
    assert!(batcher_err.is_canceled());

    let batches = sink.batches.lock().unwrap().clone();
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 8));
    let mut values: Vec<String> = batches.into_iter().flatten().collect();
    values.sort();
    let mut expected: Vec<String> = (0..20)
        .flat_map(|v| [format!("{v}"), format!("{v}!")])
        .collect();
    expected.sort();
    assert_eq!(values, expected);

    assert_eq!(acked.load(Ordering::SeqCst), 20);
    assert_eq!(processor.metrics().messages_received, 20);
    assert_eq!(batcher.metrics().messages_flushed, 40);
    drop(input);
}

#[tokio::test]
async fn failed_flush_leaves_messages_unacked() {
    init_tracing();

    let batcher = Arc::new(Batcher::<String>::new(
        Arc::new(Broken),
        BatcherConfig::default().with_flush_length(1),
    ));
    let (input, source) = ChannelSource::<u32>::channel(8);
    let processor = Arc::new(
        Processor::<u32, String>::builder()
            .source(Arc::new(source))
            .destination(batcher.clone())
            .handler(Arc::new(handler_fn(|_ctx: Context, v: u32| async move {
                Ok::<_, FlowError>(vec![v.to_string()])
            })))
            .parallelism(2)
            .build()
            .unwrap(),
    );

    let processor_ctx = Context::background();
    let processor_run = tokio::spawn({
        let processor = processor.clone();
        let ctx = processor_ctx.clone();
        async move { processor.run(&ctx).await }
    });

    let acked = Arc::new(AtomicU32::new(0));
    for v in 0..4 {
        input.send((v, counting_ack(&acked))).await.unwrap();
    }

    let err = tokio::time::timeout(Duration::from_secs(1), batcher.run(&Context::background()))
        .await
        .expect("batcher did not stop")
        .unwrap_err();
    assert_eq!(err.to_string(), "warehouse offline");

    // workers are now parked on a full queue; the caller shuts the pool down
    processor_ctx.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), processor_run)
        .await
        .expect("processor did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(acked.load(Ordering::SeqCst), 0);
    assert_eq!(batcher.metrics().flush_failures, 1);
}

#[tokio::test]
async fn concurrent_producers_each_get_one_ack() {
    init_tracing();

    let sink = Arc::new(Collect::default());
    let config = BatcherConfig::default()
        .with_flush_length(4)
        .with_flush_frequency(Duration::from_millis(5))
        .with_buffer_size(2);
    let batcher = Arc::new(Batcher::<String>::new(sink.clone(), config));
    let ctx = Context::background();
    let run = tokio::spawn({
        let batcher = batcher.clone();
        let ctx = ctx.clone();
        async move { batcher.run(&ctx).await }
    });

    let counts: Vec<Arc<AtomicU32>> = (0..10).map(|_| Arc::new(AtomicU32::new(0))).collect();
    let sends = counts.iter().enumerate().map(|(i, count)| {
        let batcher = batcher.clone();
        let ctx = ctx.clone();
        let ack = counting_ack(count);
        async move {
            let values: Vec<String> = (0..3).map(|j| format!("{i}-{j}")).collect();
            batcher.send(&ctx, ack, values).await
        }
    });
    for result in futures::future::join_all(sends).await {
        result.unwrap();
    }

    for count in &counts {
        wait_until(count, 1).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(batcher.metrics().messages_flushed, 30);

    // per-producer order survives batching
    let values: Vec<String> = sink.batches.lock().unwrap().iter().flatten().cloned().collect();
    for i in 0..10 {
        let prefix = format!("{i}-");
        let mine: Vec<&String> = values.iter().filter(|v| v.starts_with(&prefix)).collect();
        assert_eq!(mine, vec![&format!("{i}-0"), &format!("{i}-1"), &format!("{i}-2")]);
    }

    ctx.cancel();
    assert!(run.await.unwrap().unwrap_err().is_canceled());
}
