//! Background job: cancel pending approvals whose deadline has passed.
//!
//! Each tick queries the store for expired pending records and drives every
//! one through `ApprovalCoordinator::expire`, the same public operation an
//! operator path would use, so the atomicity guarantee stays in one place.
//! The sweep is best-effort: correctness of expiry is owned by the
//! coordinator's CAS plus the deadline check in the resolve path, not by
//! sweep timeliness. A tick that fails is logged and retried on the next
//! interval; the loop never takes the host down.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalCoordinator, ExpireOutcome};
use crate::store::ApprovalStore;

/// Outcome counts for one sweep tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Records this tick transitioned to Cancelled/Timeout.
    pub expired: usize,
    /// Records that were already terminal or no longer due: lost races,
    /// the expected outcome under concurrent operator activity.
    pub raced: usize,
    /// Per-record storage failures; retried on the next tick.
    pub errors: usize,
}

/// Spawn the sweep loop. Call this once at startup.
pub fn spawn(
    coordinator: Arc<ApprovalCoordinator>,
    store: Arc<dyn ApprovalStore>,
    interval_seconds: u64,
    max_concurrent: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_seconds));
        loop {
            interval.tick().await;
            match run_tick(&coordinator, store.as_ref(), max_concurrent).await {
                Ok(stats) if stats.expired > 0 || stats.errors > 0 => {
                    info!(
                        expired = stats.expired,
                        raced = stats.raced,
                        errors = stats.errors,
                        "expiry sweep tick finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    // Query failure: nothing was mutated, next tick retries.
                    warn!(error = %e, "expiry sweep tick failed");
                }
            }
        }
    })
}

/// Run a single sweep pass. Exposed separately so tests can tick the sweep
/// without standing up the interval loop.
pub async fn run_tick(
    coordinator: &ApprovalCoordinator,
    store: &dyn ApprovalStore,
    max_concurrent: usize,
) -> anyhow::Result<SweepStats> {
    let due = store.list_expired_pending(Utc::now()).await?;
    if due.is_empty() {
        return Ok(SweepStats::default());
    }

    debug!(count = due.len(), "expiry sweep found overdue approvals");

    let expired = AtomicUsize::new(0);
    let raced = AtomicUsize::new(0);
    let errors = AtomicUsize::new(0);

    // Bounded fan-out: a pile-up of simultaneous expirations must not
    // saturate the store with one update per record all at once.
    stream::iter(due)
        .for_each_concurrent(max_concurrent.max(1), |record| {
            let expired = &expired;
            let raced = &raced;
            let errors = &errors;
            async move {
                match coordinator.expire(record.id).await {
                    Ok(ExpireOutcome::Expired(_)) => {
                        expired.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(ExpireOutcome::AlreadyTerminal { status }) => {
                        debug!(
                            approval_id = %record.id,
                            status = %status,
                            "sweep lost race, record already terminal"
                        );
                        raced.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(ExpireOutcome::NotYetDue) | Ok(ExpireOutcome::NotFound) => {
                        raced.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // One record failing must not block the rest of
                        // the batch.
                        warn!(approval_id = %record.id, error = %e, "expire failed during sweep");
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        })
        .await;

    Ok(SweepStats {
        expired: expired.into_inner(),
        raced: raced.into_inner(),
        errors: errors.into_inner(),
    })
}
