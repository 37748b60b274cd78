//! Per-operation deadlines and cancellation.
//!
//! Every storage call takes an [`OperationContext`] as its first argument.
//! The context carries an optional deadline and a [`CancellationToken`];
//! [`OperationContext::run`] races the backend future against both, so an
//! aborted call drops its in-flight work (including any per-operation session
//! copy) on every exit path.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{OperationError, StorageResult};

/// Deadline and cancellation scope for a storage operation.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use neutrino_persistence::core::OperationContext;
///
/// let ctx = OperationContext::background().with_timeout(Duration::from_secs(2));
/// assert!(ctx.deadline().is_some());
///
/// let child = ctx.child();
/// ctx.cancel();
/// assert!(child.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct OperationContext {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OperationContext {
    /// A context with no deadline and a fresh cancellation token.
    pub fn background() -> Self {
        Self {
            timeout: None,
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Replaces the cancellation token, typically with one owned by a request.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Derives a context that is cancelled with this one but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            timeout: self.timeout,
            deadline: self.deadline,
            cancellation: self.cancellation.child_token(),
        }
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called on this context
    /// or a parent.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Runs `fut` unless the context is cancelled or its deadline passes first.
    ///
    /// `operation` names the call in the returned error.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(self.cancelled(operation));
        }

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(self.cancelled(operation)),
            _ = deadline => Err(OperationError::DeadlineExceeded {
                operation: operation.to_string(),
                timeout_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
            }
            .into()),
            result = fut => result,
        }
    }

    fn cancelled(&self, operation: &str) -> crate::error::StorageError {
        OperationError::Cancelled {
            operation: operation.to_string(),
        }
        .into()
    }
}
