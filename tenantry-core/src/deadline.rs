/// Cancellable deadlines for identity operations
///
/// Every service operation runs inside [`Deadline::run`]. When the deadline
/// passes or the caller cancels, the operation future is dropped on the spot.
/// Dropping it drops any open store transaction with it, so nothing the
/// operation wrote becomes visible.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tenantry_core::deadline::Deadline;
/// use tenantry_core::error::IdentityError;
///
/// # async fn example() {
/// let deadline = Deadline::after(Duration::from_millis(10));
/// let result = deadline
///     .run(async {
///         tokio::time::sleep(Duration::from_secs(5)).await;
///         Ok::<_, IdentityError>(())
///     })
///     .await;
/// assert!(matches!(result, Err(IdentityError::DeadlineExceeded)));
/// # }
/// ```

use crate::error::IdentityError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default per-operation budget (30 seconds)
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Shortest budget accepted from configuration
pub const MIN_OPERATION_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest budget accepted from configuration (10 minutes)
pub const MAX_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Clamps a configured timeout into the accepted range
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_OPERATION_TIMEOUT, MAX_OPERATION_TIMEOUT)
}

/// Point in time after which an operation is abandoned, plus a cancel signal
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Option<Instant>,
    cancel_token: CancellationToken,
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

impl Deadline {
    /// No time limit; still cancellable through [`cancel_token`](Self::cancel_token)
    pub fn none() -> Self {
        Self {
            expires_at: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Expires `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Some(Instant::now() + timeout),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Ties this deadline to an external cancellation token
    ///
    /// Cancelling `token` (or any parent of it) aborts the operation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Time left, or None without a limit
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().map(|left| left.is_zero()).unwrap_or(false)
    }

    /// Runs `operation` until it completes, the deadline passes, or the token fires
    ///
    /// Cancellation wins over expiry when both are ready.
    pub async fn run<T, F>(&self, operation: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, IdentityError>>,
    {
        if self.cancel_token.is_cancelled() {
            return Err(IdentityError::Cancelled);
        }

        let expiry = async {
            match self.expires_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => {
                tracing::warn!("Identity operation cancelled by caller");
                Err(IdentityError::Cancelled)
            }
            _ = expiry => {
                tracing::warn!("Identity operation exceeded its deadline");
                Err(IdentityError::DeadlineExceeded)
            }
            result = operation => result,
        }
    }
}
