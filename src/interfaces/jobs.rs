// ============================================================
// BACKGROUND JOBS
// ============================================================
// Long-running batches on the tokio runtime with progress and cancel

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::{BatchRunner, ExportRequest, ImportRequest, RoundTripValidator};
use crate::domain::error::{Result, SyncError};
use crate::domain::job::{CancellationFlag, JobContext, ProgressCallback};
use crate::domain::report::{BatchReport, ExportResult, ImportResult, ValidationSummary};

/// A spawned job; cancellation is cooperative and observed between items and batches.
pub struct JobHandle<T> {
    cancel: CancellationFlag,
    handle: JoinHandle<Result<T>>,
}

impl<T> JobHandle<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if self.cancel.is_cancelled() => {
                warn!(error = %err, "Cancelled job did not finish cleanly");
                Err(SyncError::Cancelled)
            }
            Err(err) => Err(SyncError::Internal(format!("job task failed: {}", err))),
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    batch: BatchRunner,
    validator: RoundTripValidator,
}

impl JobRunner {
    pub fn new(batch: BatchRunner, validator: RoundTripValidator) -> Self {
        Self { batch, validator }
    }

    pub fn spawn_import(
        &self,
        requests: Vec<ImportRequest>,
        progress: Option<ProgressCallback>,
    ) -> JobHandle<BatchReport<ImportResult>> {
        let batch = self.batch.clone();
        spawn_job(progress, move |ctx| async move {
            info!(items = requests.len(), "Import job started");
            batch.import_all(&requests, &ctx).await
        })
    }

    pub fn spawn_export(
        &self,
        requests: Vec<ExportRequest>,
        progress: Option<ProgressCallback>,
    ) -> JobHandle<BatchReport<ExportResult>> {
        let batch = self.batch.clone();
        spawn_job(progress, move |ctx| async move {
            info!(items = requests.len(), "Export job started");
            batch.export_all(&requests, &ctx).await
        })
    }

    /// Validate one table, or every catalogued entry when `table_name` is `None`.
    pub fn spawn_validate(
        &self,
        table_name: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> JobHandle<ValidationSummary> {
        let validator = self.validator.clone();
        spawn_job(progress, move |ctx| async move {
            match table_name {
                Some(table) => validator.validate_table(&table, &ctx).await,
                None => validator.validate_all(&ctx).await,
            }
        })
    }
}

fn spawn_job<T, F, Fut>(progress: Option<ProgressCallback>, job: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce(JobContext) -> Fut,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    let cancel = CancellationFlag::new();
    let mut ctx = JobContext::new().with_cancellation(cancel.clone());
    if let Some(progress) = progress {
        ctx = ctx.with_progress(progress);
    }
    let handle = tokio::spawn(job(ctx));
    JobHandle { cancel, handle }
}
