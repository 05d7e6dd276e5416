use std::future::Future;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{DomainError, DomainResult};

/// Per-tick context handed to every outbound call.
///
/// Cancellation is cooperative: adapters call [`ReconcileContext::check`]
/// before doing work, or wrap the work in [`ReconcileContext::run`].
#[derive(Debug, Clone, Default)]
pub struct ReconcileContext {
    cancellation_token: CancellationToken,
    deadline: Option<DateTime<Utc>>,
}

impl ReconcileContext {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled() || self.deadline.is_some_and(|d| Utc::now() >= d)
    }

    /// Fails with [`DomainError::Cancelled`] once the tick is cancelled or past its deadline.
    pub fn check(&self) -> DomainResult<()> {
        if self.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        Ok(())
    }

    /// Runs `fut`, aborting it promptly if the tick is cancelled.
    pub async fn run<T, F>(&self, fut: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        self.check()?;
        let remaining = self
            .deadline
            .map(|d| (d - Utc::now()).to_std().unwrap_or_default());

        tokio::select! {
            () = self.cancellation_token.cancelled() => Err(DomainError::Cancelled),
            () = sleep_or_pending(remaining) => Err(DomainError::Cancelled),
            result = fut => result,
        }
    }
}

async fn sleep_or_pending(remaining: Option<std::time::Duration>) {
    match remaining {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
