use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Time source for lease and retry bookkeeping.
///
/// The dispatcher and sweepers take their timestamps from here instead of
/// calling `Utc::now()` inline, so tests can drive expiry deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
