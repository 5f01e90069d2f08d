//! Background workers for the processing queue.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::dispatcher::Dispatcher;

/// Start the processing worker pool.
/// This should be called once on server startup.
pub fn start_workers(dispatcher: Arc<Dispatcher>, count: usize) {
    for worker_id in 0..count {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            info!(worker_id, "Processing worker started");
            loop {
                // Claim the next pending job under a lease
                match dispatcher.lease() {
                    Ok(Some(job)) => {
                        if let Err(e) = dispatcher.execute(job, worker_id).await {
                            error!(worker_id, error = %e, "Failed to acknowledge job result");
                        }
                    }
                    Ok(None) => {
                        // Queue is empty, sleep before checking again
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                    Err(e) => {
                        error!(worker_id, error = %e, "Failed to lease next job");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }
}

/// Start the lease sweep task.
/// Running jobs whose worker disappeared get their lease reclaimed here.
pub fn start_lease_reaper(dispatcher: Arc<Dispatcher>) {
    let sweep_interval = Duration::from_secs(dispatcher.config().lease_sweep_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match dispatcher.requeue_expired() {
                Ok(count) if count > 0 => {
                    info!(requeued = count, "Lease sweep requeued expired jobs");
                }
                Err(e) => {
                    warn!(error = %e, "Lease sweep failed");
                }
                _ => {}
            }
        }
    });
}

/// Start the retry promotion task.
/// Retrying jobs become pending again once their backoff deadline passes.
pub fn start_retry_promoter(dispatcher: Arc<Dispatcher>) {
    let sweep_interval = Duration::from_secs(dispatcher.config().retry_sweep_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            match dispatcher.promote_retries() {
                Ok(count) if count > 0 => {
                    info!(promoted = count, "Promoted retry backoffs to pending");
                }
                Err(e) => {
                    warn!(error = %e, "Retry promotion sweep failed");
                }
                _ => {}
            }
        }
    });
}
