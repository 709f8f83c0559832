//! Background delivery of commit statuses.
//!
//! Request handlers enqueue build ids; a single worker task loads the build
//! and reports its current status. Reports never block a request: a full
//! queue drops the report.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::services::status_reporter::StatusReporter;
use crate::store::Store;

/// Sending half of the status queue.
#[derive(Clone, Debug)]
pub struct StatusQueue {
    tx: Option<mpsc::Sender<i64>>,
}

impl StatusQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<i64>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A queue that discards everything, for when reporting is not configured.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn enqueue(&self, build_id: i64) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(build_id) {
            crate::metrics::status_report("dropped");
            tracing::warn!(build_id, "Commit status not queued: {e}");
        }
    }
}

/// Report statuses for queued build ids until every sender is dropped.
pub async fn run_status_worker(
    mut rx: mpsc::Receiver<i64>,
    store: Arc<dyn Store>,
    reporter: StatusReporter,
) {
    tracing::info!("Commit status worker started");

    while let Some(build_id) = rx.recv().await {
        if let Err(e) = report_build(store.as_ref(), &reporter, build_id).await {
            tracing::warn!(build_id, "Commit status report failed: {e:#}");
        }
    }

    tracing::info!("Commit status worker stopped");
}

async fn report_build(
    store: &dyn Store,
    reporter: &StatusReporter,
    build_id: i64,
) -> anyhow::Result<()> {
    let build = store
        .get_build(build_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("build not found"))?;
    let repo = store
        .get_repository(build.repo_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("repository {} not found", build.repo_id))?;
    let plan = store
        .get_plan(build.plan_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("plan {} not found", build.plan_id))?;

    reporter.report(&repo, &plan, &build).await?;
    Ok(())
}
