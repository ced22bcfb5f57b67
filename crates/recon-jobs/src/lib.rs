//! Job orchestration: driving the staging promoter, the report merger, and
//! the delta & reason pass over the document store.
//!
//! Jobs are cooperative and single-threaded: every streaming loop fetches
//! one batch at a time through a store cursor, yields between batches so
//! sibling tasks make progress, and honors a [`CancelToken`] at batch
//! boundaries. Handlers never run pipelines inline; they enqueue a
//! descriptor on the [`JobQueue`] and return.

pub mod api;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod promote;
pub mod queue;
pub mod registry;
pub mod report;

pub use api::OpResult;
pub use cancel::CancelToken;
pub use config::JobConfig;
pub use context::JobContext;
pub use error::JobError;
pub use promote::{promote, PromoteCounters};
pub use queue::{JobKind, JobQueue};
pub use report::{evaluate_reports, CollectionRun, ReportCounters};
