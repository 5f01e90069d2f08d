//! Background processing pipeline for documents.
//!
//! Jobs are persisted rows in `processing_jobs`; workers lease them one at a
//! time, dispatch to the matching handler, and merge results back into the
//! search index. Every transition goes through the dispatcher so leases,
//! retries, and cancellation stay consistent.

mod cancellation;
mod dispatcher;
mod handlers;
mod lifecycle;
mod registry;
mod workers;

pub use cancellation::CancellationRegistry;
pub use dispatcher::{Dispatcher, IdGen, UuidGen};
pub use handlers::{HandlerContext, JobHandler, JobOutput, JobParams};
pub(crate) use handlers::truncate_chars;
pub use registry::HandlerRegistry;
pub use workers::{start_lease_reaper, start_retry_promoter, start_workers};
