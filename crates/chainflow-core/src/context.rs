//! Cancelable lifetime shared by pipeline tasks.
//!
//! A [`Context`] is a cheap, cloneable handle over a [`CancellationToken`]
//! that also remembers *why* it terminated. Children are canceled together
//! with their parent and report the parent's cause.
//!
//! ```text
//! background ──child()──► worker ctx ──with_timeout()──► request ctx
//!     │                       │                              │
//!   cancel()  ───────────►  Canceled  ────────────────────►  Canceled
//!                                                    deadline ► DeadlineExceeded
//! ```

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Reason a [`Context`] terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// `cancel()` was called on the context or one of its ancestors.
    #[error("context canceled")]
    Canceled,
    /// The deadline of the context or one of its ancestors passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

struct Inner {
    token: CancellationToken,
    cause: Arc<OnceLock<ContextError>>,
    deadline: Option<Instant>,
    parent: Option<Context>,
    // stops the deadline timer once the last handle is dropped
    _timer: Option<DropGuard>,
}

/// Cancelable lifetime handed to every blocking pipeline call.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A root context that only terminates when canceled explicitly.
    pub fn background() -> Self {
        Self::from_parts(CancellationToken::new(), None, None)
    }

    /// Derive a child that terminates with `self`, or earlier via its own `cancel()`.
    pub fn child(&self) -> Self {
        Self::from_parts(
            self.inner.token.child_token(),
            self.inner.deadline,
            Some(self.clone()),
        )
    }

    /// Derive a child that terminates with `DeadlineExceeded` after `timeout`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child that terminates with `DeadlineExceeded` at `deadline`.
    ///
    /// Must be called from within a Tokio runtime. The timer task stops when
    /// the context is canceled or its last handle (including children) is dropped.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        if matches!(self.inner.deadline, Some(d) if d <= deadline) {
            return self.child();
        }

        let token = self.inner.token.child_token();
        let cause = Arc::new(OnceLock::new());

        if deadline <= Instant::now() {
            let _ = cause.set(ContextError::DeadlineExceeded);
            token.cancel();
            return Self::from_inner(Inner {
                token,
                cause,
                deadline: Some(deadline),
                parent: Some(self.clone()),
                _timer: None,
            });
        }

        tokio::spawn({
            let token = token.clone();
            let cause = Arc::clone(&cause);
            async move {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        let _ = cause.set(ContextError::DeadlineExceeded);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            }
        });
        Self::from_inner(Inner {
            _timer: Some(token.clone().drop_guard()),
            token,
            cause,
            deadline: Some(deadline),
            parent: Some(self.clone()),
        })
    }

    /// Cancel this context and all of its children. Idempotent.
    ///
    /// A context already terminated by an ancestor keeps the ancestor's cause.
    pub fn cancel(&self) {
        if !self.inner.token.is_cancelled() {
            let _ = self.inner.cause.set(ContextError::Canceled);
        }
        self.inner.token.cancel();
    }

    /// Returns `true` once the context has terminated.
    pub fn is_done(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the context has terminated.
    pub async fn done(&self) {
        self.inner.token.cancelled().await
    }

    /// `None` while live, otherwise the termination cause.
    pub fn err(&self) -> Option<ContextError> {
        if !self.inner.token.is_cancelled() {
            return None;
        }
        if let Some(cause) = self.inner.cause.get() {
            return Some(*cause);
        }
        self.inner
            .parent
            .as_ref()
            .and_then(Context::err)
            .or(Some(ContextError::Canceled))
    }

    /// The effective deadline, inherited from ancestors.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Race `fut` against termination of this context.
    ///
    /// Termination wins when both are ready.
    pub async fn until_done<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.done() => Err(self.err().unwrap_or(ContextError::Canceled)),
            out = fut => Ok(out),
        }
    }

    fn from_parts(
        token: CancellationToken,
        deadline: Option<Instant>,
        parent: Option<Context>,
    ) -> Self {
        Self::from_inner(Inner {
            token,
            cause: Arc::new(OnceLock::new()),
            deadline,
            parent,
            _timer: None,
        })
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("done", &self.is_done())
            .field("err", &self.err())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}
