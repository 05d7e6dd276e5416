//! Scheduler-side driver around the phase orchestrator.
//!
//! Runs ticks for many resources with bounded concurrency, never two ticks
//! for the same resource at once, and turns every tick result into the time
//! of the next run: the requested requeue on success, exponential backoff
//! on error.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::domain::errors::{DomainError, DomainResult, ErrorKind};
use crate::domain::models::{ReconcileContext, ResourceKey, RetryConfig};
use crate::services::phase_orchestrator::PhaseOrchestrator;

/// When a resource should be reconciled next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    /// Requeue requested by the tick itself.
    Requeue(Duration),
    /// Retry after a failed tick.
    Backoff(Duration),
    /// Nothing scheduled; wait for the next change event.
    Idle,
}

impl NextRun {
    pub const fn delay(&self) -> Option<Duration> {
        match self {
            Self::Requeue(d) | Self::Backoff(d) => Some(*d),
            Self::Idle => None,
        }
    }
}

/// Result of one tick as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub key: ResourceKey,
    pub next: NextRun,
    /// Consecutive failed ticks, zero after a success.
    pub failures: u32,
    pub error: Option<String>,
}

#[derive(Debug)]
struct RetryState {
    backoff: ExponentialBackoff,
    failures: u32,
}

/// Releases the in-flight slot of a key when dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<ResourceKey>>,
    key: ResourceKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct ReconcileDriver {
    orchestrator: Arc<PhaseOrchestrator>,
    semaphore: Semaphore,
    in_flight: Mutex<HashSet<ResourceKey>>,
    retries: Mutex<HashMap<ResourceKey, RetryState>>,
    retry: RetryConfig,
}

impl ReconcileDriver {
    pub fn new(orchestrator: Arc<PhaseOrchestrator>) -> Self {
        let config = orchestrator.config();
        let permits = config.max_concurrent_reconciles.max(1);
        let retry = config.retry.clone();
        Self {
            orchestrator,
            semaphore: Semaphore::new(permits),
            in_flight: Mutex::new(HashSet::new()),
            retries: Mutex::new(HashMap::new()),
            retry,
        }
    }

    fn new_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    fn claim(&self, key: &ResourceKey) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: &self.in_flight,
            key: key.clone(),
        })
    }

    /// Runs one tick for `key`.
    ///
    /// Fails only when the key is already being reconciled or the tick was
    /// cancelled; reconcile errors become a backoff.
    pub async fn run_once(
        &self,
        ctx: &ReconcileContext,
        key: &ResourceKey,
    ) -> DomainResult<TickOutcome> {
        let Some(_guard) = self.claim(key) else {
            return Err(DomainError::NotReady(format!(
                "'{key}' is already being reconciled"
            )));
        };
        let _permit = ctx
            .run(async {
                self.semaphore
                    .acquire()
                    .await
                    .map_err(|_| DomainError::Cancelled)
            })
            .await?;

        match self.orchestrator.reconcile(ctx, key).await {
            Ok(result) => {
                self.retries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(key);
                let next = result.after.map_or(NextRun::Idle, NextRun::Requeue);
                Ok(TickOutcome {
                    key: key.clone(),
                    next,
                    failures: 0,
                    error: None,
                })
            }
            Err(e) if e.kind() == ErrorKind::Cancelled => Err(e),
            Err(e) => Ok(self.backoff(key, &e)),
        }
    }

    fn backoff(&self, key: &ResourceKey, err: &DomainError) -> TickOutcome {
        let max = Duration::from_millis(self.retry.max_backoff_ms);
        let mut retries = self.retries.lock().unwrap_or_else(PoisonError::into_inner);
        let state = retries.entry(key.clone()).or_insert_with(|| RetryState {
            backoff: self.new_backoff(),
            failures: 0,
        });
        state.failures += 1;

        let delay = if state.failures > self.retry.max_retries {
            error!(
                resource = %key,
                failures = state.failures,
                error = %err,
                "reconcile keeps failing, retrying at the maximum interval"
            );
            max
        } else {
            warn!(resource = %key, failures = state.failures, error = %err, "reconcile failed");
            state.backoff.next_backoff().unwrap_or(max)
        };

        TickOutcome {
            key: key.clone(),
            next: NextRun::Backoff(delay),
            failures: state.failures,
            error: Some(err.to_string()),
        }
    }

    /// Runs one tick for each key, at most `max_concurrent_reconciles` at once.
    pub async fn run_all(
        &self,
        ctx: &ReconcileContext,
        keys: &[ResourceKey],
    ) -> Vec<DomainResult<TickOutcome>> {
        info!(resources = keys.len(), "reconciling");
        join_all(keys.iter().map(|key| self.run_once(ctx, key))).await
    }
}
