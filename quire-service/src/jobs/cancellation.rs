//! Cancellation token management for running jobs.
//!
//! Tokens are keyed by job ID and live only while a worker executes the job.
//! Each registration carries an attempt stamp, so a stale worker's cleanup
//! after a lease requeue cannot drop the token a newer attempt registered.
//! Cancelling a job that has no registered token is still meaningful; the row
//! transition happens in the database and the worker never picks it up.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct Registered {
    attempt: u64,
    token: CancellationToken,
}

#[derive(Default)]
pub struct CancellationRegistry {
    tokens: DashMap<String, Registered>,
    attempts: AtomicU64,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            attempts: AtomicU64::new(0),
        }
    }

    /// Register a cancellation token for a job being executed.
    ///
    /// Returns the attempt stamp alongside the token; the worker hands the
    /// stamp back to [`CancellationRegistry::unregister`] when it finishes.
    pub fn register(&self, job_id: &str) -> (u64, CancellationToken) {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        self.tokens.insert(
            job_id.to_string(),
            Registered {
                attempt,
                token: token.clone(),
            },
        );
        (attempt, token)
    }

    /// Cancel a running job's token if one is registered.
    pub fn cancel(&self, job_id: &str) -> bool {
        if let Some((_, registered)) = self.tokens.remove(job_id) {
            registered.token.cancel();
            info!(job_id = %job_id, "Job cancellation triggered");
            true
        } else {
            false
        }
    }

    /// Remove a token when execution finishes normally.
    ///
    /// Only the entry with the matching attempt stamp is removed; a worker
    /// whose lease expired cannot evict the token of the attempt that
    /// replaced it.
    pub fn unregister(&self, job_id: &str, attempt: u64) {
        self.tokens
            .remove_if(job_id, |_, registered| registered.attempt == attempt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_cancel() {
        let registry = CancellationRegistry::new();
        let (_, token) = registry.register("job-1");
        assert!(!token.is_cancelled());

        assert!(registry.cancel("job-1"));
        assert!(token.is_cancelled());

        // Token is gone after cancel
        assert!(!registry.cancel("job-1"));
    }

    #[test]
    fn test_unregister_leaves_token_untouched() {
        let registry = CancellationRegistry::new();
        let (attempt, token) = registry.register("job-2");
        registry.unregister("job-2", attempt);

        assert!(!token.is_cancelled());
        assert!(!registry.cancel("job-2"));
    }

    #[test]
    fn test_stale_worker_cleanup_keeps_the_new_token() {
        let registry = CancellationRegistry::new();

        // Lease expired, another worker picked the job up again
        let (stale_attempt, stale_token) = registry.register("job-3");
        let (_, fresh_token) = registry.register("job-3");

        registry.unregister("job-3", stale_attempt);

        // The replacement token still receives the cancel
        assert!(registry.cancel("job-3"));
        assert!(fresh_token.is_cancelled());
        assert!(!stale_token.is_cancelled());
    }
}
