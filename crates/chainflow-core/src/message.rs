//! Messages and acknowledgment handles.
//!
//! An [`Ack`] is produced by a `Source` together with each value and is
//! consumed exactly once when the unit of work is durable. When one logical
//! ack covers several outgoing values, an [`AckChain`] counts down and fires
//! the underlying ack only after the last of them has been acknowledged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type AckFn = Box<dyn FnOnce() + Send + 'static>;

/// At-most-once acknowledgment callback.
///
/// Consuming [`Ack::ack`] guarantees the callback cannot run twice.
#[derive(Default)]
pub struct Ack {
    callback: Option<AckFn>,
}

impl Ack {
    /// Wrap a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Some(Box::new(f)),
        }
    }

    /// An ack that does nothing.
    pub fn noop() -> Self {
        Self { callback: None }
    }

    /// Returns `true` if acking has no effect.
    pub fn is_noop(&self) -> bool {
        self.callback.is_none()
    }

    /// Signal that the unit of work is durable.
    pub fn ack(self) {
        if let Some(f) = self.callback {
            f();
        }
    }
}

impl std::fmt::Debug for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ack").field("noop", &self.is_noop()).finish()
    }
}

/// Countdown latch over one [`Ack`].
///
/// The inner ack fires on the `n`th call to [`AckChain::ack`]; calls beyond
/// `n` are no-ops. The counter never drops below zero.
pub struct AckChain {
    remaining: AtomicUsize,
    inner: Mutex<Option<Ack>>,
}

impl AckChain {
    /// Build a chain that fires `ack` after `n` acknowledgments.
    ///
    /// With `n == 0` there is nothing to wait for and `ack` fires immediately.
    pub fn new(ack: Ack, n: usize) -> Arc<Self> {
        let chain = Arc::new(Self {
            remaining: AtomicUsize::new(n),
            inner: Mutex::new(Some(ack)),
        });
        if n == 0 {
            chain.fire();
        }
        chain
    }

    /// Count down once.
    pub fn ack(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.fire();
        }
    }

    /// Acknowledgments still outstanding.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    fn fire(&self) {
        let ack = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ack) = ack {
            ack.ack();
        }
    }
}

impl std::fmt::Debug for AckChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckChain")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// A value travelling through the pipeline with its acknowledgment.
#[derive(Debug)]
pub struct Message<T> {
    pub value: T,
    ack: Option<Arc<AckChain>>,
}

impl<T> Message<T> {
    /// A message without acknowledgment.
    pub fn new(value: T) -> Self {
        Self { value, ack: None }
    }

    /// A message counting down `chain` when acknowledged.
    pub fn with_ack(value: T, chain: Arc<AckChain>) -> Self {
        Self {
            value,
            ack: Some(chain),
        }
    }

    /// Acknowledge this message once.
    pub fn ack(self) {
        if let Some(chain) = self.ack {
            chain.ack();
        }
    }

    /// Split into the value and an acknowledgment closure.
    pub fn into_parts(self) -> (T, Ack) {
        let ack = match self.ack {
            Some(chain) => Ack::new(move || chain.ack()),
            None => Ack::noop(),
        };
        (self.value, ack)
    }
}
