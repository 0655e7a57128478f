//! Batcher configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Flush policy for a [`Batcher`](crate::Batcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Maximum messages per batch; reaching it forces a flush. Minimum 1.
    #[serde(default = "default_flush_length")]
    pub flush_length: usize,
    /// Maximum time a non-empty batch may wait before it is flushed.
    /// `0` disables time-based flushing.
    #[serde(default = "default_flush_frequency_ms")]
    pub flush_frequency_ms: u64,
    /// Capacity of the queue between `send` and the run loop.
    /// Defaults to `flush_length`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_size: Option<usize>,
}

fn default_flush_length() -> usize { 100 }
fn default_flush_frequency_ms() -> u64 { 1_000 }

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_length: default_flush_length(),
            flush_frequency_ms: default_flush_frequency_ms(),
            buffer_size: None,
        }
    }
}

impl BatcherConfig {
    pub fn with_flush_length(mut self, flush_length: usize) -> Self {
        self.flush_length = flush_length;
        self
    }

    /// Set the flush frequency. `Duration::ZERO` disables time-based flushing;
    /// sub-millisecond values round up to 1ms.
    pub fn with_flush_frequency(mut self, frequency: Duration) -> Self {
        self.flush_frequency_ms = if frequency.is_zero() {
            0
        } else {
            (frequency.as_millis() as u64).max(1)
        };
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// The flush frequency, or `None` when time-based flushing is disabled.
    pub fn flush_frequency(&self) -> Option<Duration> {
        (self.flush_frequency_ms > 0).then(|| Duration::from_millis(self.flush_frequency_ms))
    }

    /// Clamp values to their minimums and resolve defaults.
    pub(crate) fn normalized(mut self) -> Self {
        self.flush_length = self.flush_length.max(1);
        self.buffer_size = Some(self.buffer_size.unwrap_or(self.flush_length).max(1));
        self
    }
}
