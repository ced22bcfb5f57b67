//! A background job worker decoupled from the ingress surface: handlers
//! enqueue a descriptor and return; the worker owns execution, one job at
//! a time.

use log::{error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::JobContext;
use crate::error::JobError;
use crate::promote::promote;
use crate::report::evaluate_reports;

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Promote one data source, or all of them.
    Promote { collection: Option<String> },
    /// Evaluate one report, or all of them.
    EvaluateReports { report: Option<String> },
}

/// Owns the worker task; dropping or shutting down the queue stops it once
/// queued jobs finish.
pub struct JobQueue {
    tx: mpsc::UnboundedSender<JobKind>,
    worker: JoinHandle<()>,
}

impl JobQueue {
    /// Spawn the worker on the current runtime.
    pub fn spawn(ctx: JobContext) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<JobKind>();
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                run_job(&ctx, job).await;
            }
        });
        JobQueue { tx, worker }
    }

    /// Hand a job to the worker. Fails only when the worker is gone.
    pub fn enqueue(&self, job: JobKind) -> Result<(), JobError> {
        self.tx.send(job).map_err(|_| JobError::QueueClosed)
    }

    /// Let queued jobs drain, then stop the worker.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!("job worker terminated abnormally: {e}");
        }
    }
}

async fn run_job(ctx: &JobContext, job: JobKind) {
    match job {
        JobKind::Promote { collection } => {
            match promote(ctx, collection.as_deref()).await {
                Ok(results) => info!("promotion finished: {} collection(s)", results.len()),
                Err(e) => error!("promotion job failed: {e}"),
            }
        }
        JobKind::EvaluateReports { report } => {
            match evaluate_reports(ctx, report.as_deref()).await {
                Ok(results) => info!("report evaluation finished: {} report(s)", results.len()),
                Err(e) => error!("report evaluation job failed: {e}"),
            }
        }
    }
}
