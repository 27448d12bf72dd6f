// ============================================================
// BATCH RUNNER
// ============================================================
// Many files in one job; one bad file is reported, not fatal

use tracing::{info, warn};

use super::exporter::{ExportRequest, Exporter};
use super::importer::{ImportRequest, Importer};
use super::schema_inferencer::SchemaInferencer;
use crate::domain::error::{Result, SyncError};
use crate::domain::job::JobContext;
use crate::domain::report::{BatchFailure, BatchReport, ExportResult, ImportResult};

#[derive(Clone)]
pub struct BatchRunner {
    importer: Importer,
    exporter: Exporter,
    inferencer: SchemaInferencer,
    auto_create_schema: bool,
}

impl BatchRunner {
    pub fn new(importer: Importer, exporter: Exporter, inferencer: SchemaInferencer) -> Self {
        Self {
            importer,
            exporter,
            inferencer,
            auto_create_schema: true,
        }
    }

    /// When disabled, a missing schema is reported as a failure instead of inferred.
    pub fn with_auto_create_schema(mut self, enabled: bool) -> Self {
        self.auto_create_schema = enabled;
        self
    }

    pub async fn import_all(
        &self,
        requests: &[ImportRequest],
        ctx: &JobContext,
    ) -> Result<BatchReport<ImportResult>> {
        let mut report = BatchReport::new(requests.len());

        for (done, request) in requests.iter().enumerate() {
            if ctx.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let item = request.key().to_string();
            let item_ctx = JobContext::new().with_cancellation(ctx.cancellation().clone());

            match self.import_one(request, &item_ctx).await {
                Ok(result) if result.cancelled => {
                    warn!(item = %item, imported = result.rows_imported, "Import cancelled mid-file");
                    report.cancelled = true;
                    break;
                }
                Ok(result) => report.succeeded.push(result),
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) if err.is_resource_failure() => return Err(err),
                Err(err) => {
                    warn!(item = %item, error = %err, "Import failed");
                    report.failed.push(failure(item.clone(), &err));
                }
            }
            ctx.report(done as u64 + 1, requests.len() as u64, item);
        }

        info!("Batch import: {}", report.summary());
        Ok(report)
    }

    /// Import, inferring the schema from the item's own files when none exists yet.
    async fn import_one(&self, request: &ImportRequest, ctx: &JobContext) -> Result<ImportResult> {
        match self.importer.import(request, ctx).await {
            Err(SyncError::SchemaNotFound(table)) if self.auto_create_schema => {
                info!(table = %table, "No schema yet, inferring from the import sources");
                if let Err(err) = self
                    .inferencer
                    .infer_and_create(&request.table_name, &request.sources)
                    .await
                {
                    // A concurrent job importing another partition may have created it first.
                    if self.inferencer.schema(&request.table_name).await?.is_none() {
                        return Err(err);
                    }
                    info!(table = %table, "Schema created by another job, retrying import");
                }
                self.importer.import(request, ctx).await
            }
            outcome => outcome,
        }
    }

    pub async fn export_all(
        &self,
        requests: &[ExportRequest],
        ctx: &JobContext,
    ) -> Result<BatchReport<ExportResult>> {
        let mut report = BatchReport::new(requests.len());

        for (done, request) in requests.iter().enumerate() {
            if ctx.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let item = request.key().to_string();
            let item_ctx = JobContext::new().with_cancellation(ctx.cancellation().clone());

            match self.exporter.export(request, &item_ctx).await {
                Ok(result) => report.succeeded.push(result),
                Err(SyncError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) if err.is_resource_failure() => return Err(err),
                Err(err) => {
                    warn!(item = %item, error = %err, "Export failed");
                    report.failed.push(failure(item.clone(), &err));
                }
            }
            ctx.report(done as u64 + 1, requests.len() as u64, item);
        }

        info!("Batch export: {}", report.summary());
        Ok(report)
    }
}

fn failure(item: String, err: &SyncError) -> BatchFailure {
    BatchFailure {
        item,
        kind: err.kind().to_string(),
        cause: err.to_string(),
    }
}
