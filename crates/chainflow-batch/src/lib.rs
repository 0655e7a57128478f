//! # chainflow-batch
//!
//! Batching destination for ChainFlow pipelines.
//!
//! Producers (usually [`Processor`](chainflow_core::Processor) workers) call
//! `Destination::send`; a background task drives [`Batcher::run`], which
//! groups the queued messages into batches and writes them through a
//! [`BatchSink`].
//!
//! ## Architecture
//! ```text
//! worker ─send(ack, [v1, v2])─► AckChain(n = 2) ─► bounded queue
//!                                                      │
//!                                                      ▼
//!                                    Batcher::run (flush_length | flush_frequency)
//!                                                      │
//!                                                      ▼
//!                                     BatchSink::flush(batch) ── Ok ──► ack each message
//! ```
//!
//! The caller's ack fires once, after the last of its messages was part of a
//! successful flush, even when its messages span several batches.

pub mod batcher;
pub mod config;
pub mod sink;

pub use batcher::{Batcher, BatcherMetrics};
pub use config::BatcherConfig;
pub use sink::BatchSink;
