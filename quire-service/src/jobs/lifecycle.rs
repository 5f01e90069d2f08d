//! Job state machine rules and retry scheduling.

use crate::db::JobStatus;

/// Calculate the retry delay using exponential backoff with jitter.
pub fn retry_backoff_ms(retry_count: i64, base_ms: i64, cap_ms: i64) -> i64 {
    use rand::Rng;
    debug_assert!(base_ms > 0);
    debug_assert!(cap_ms >= base_ms);

    // Exponential: base * 2^retry_count
    let exponent = retry_count.clamp(0, 20) as u32; // Prevent overflow
    let multiplier = 2_i64.saturating_pow(exponent);
    let delay = base_ms.saturating_mul(multiplier);

    // Cap at max delay
    let capped_delay = delay.min(cap_ms);

    // Add jitter (+/- 10%)
    let mut rng = rand::thread_rng();
    let jitter_factor = rng.gen_range(0.9..=1.1);
    let final_delay = ((capped_delay as f64) * jitter_factor) as i64;

    final_delay.clamp(0, cap_ms)
}

/// Whether a job may move from one status to another.
///
/// Terminal statuses absorb; the only way out of `Retrying` is promotion back
/// to `Pending` or cancellation. `Running -> Pending` covers lease-expiry
/// requeues.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    match (from, to) {
        (Pending, Running) | (Pending, Cancelled) => true,
        (Running, Completed)
        | (Running, Failed)
        | (Running, Retrying)
        | (Running, Cancelled)
        | (Running, Pending) => true,
        (Retrying, Pending) | (Retrying, Cancelled) => true,
        _ => false,
    }
}
