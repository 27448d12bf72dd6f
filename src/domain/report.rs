// ============================================================
// OPERATION OUTCOMES
// ============================================================
// Transient results handed back to callers, never persisted

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::encoding_metadata::{MetadataKey, ValidationStatus};

/// A row that could not be stored; the file continued without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// Zero-based position of the row in its fragment.
    pub row_index: usize,
    pub fragment: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub key: MetadataKey,
    pub fragments: Vec<String>,
    pub encoding: String,
    pub has_bom: bool,
    pub content_hash: String,
    pub rows_total: usize,
    pub rows_imported: usize,
    pub row_errors: Vec<RowError>,
    /// Columns widened during the import, with their new declared length.
    pub widened_columns: Vec<(String, u32)>,
    pub unknown_fields: Vec<String>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl ImportResult {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{}: imported {}/{} rows ({} {}) in {} ms",
            self.key,
            self.rows_imported,
            self.rows_total,
            self.encoding,
            if self.has_bom { "with BOM" } else { "no BOM" },
            self.elapsed_ms
        );
        if !self.row_errors.is_empty() {
            text.push_str(&format!(", {} rows skipped", self.row_errors.len()));
        }
        if self.cancelled {
            text.push_str(", cancelled");
        }
        text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub key: MetadataKey,
    pub output_paths: Vec<PathBuf>,
    pub rows_exported: usize,
    pub fields_dropped: usize,
    pub fields_rewritten: usize,
    pub encoding: String,
    pub has_bom: bool,
    pub elapsed_ms: u64,
}

impl ExportResult {
    pub fn summary(&self) -> String {
        format!(
            "{}: exported {} rows to {} file(s), {} fields dropped, {} rewritten, in {} ms",
            self.key,
            self.rows_exported,
            self.output_paths.len(),
            self.fields_dropped,
            self.fields_rewritten,
            self.elapsed_ms
        )
    }
}

/// One failed item of a batch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub item: String,
    pub kind: String,
    pub cause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport<T> {
    pub total: usize,
    pub succeeded: Vec<T>,
    pub failed: Vec<BatchFailure>,
    pub cancelled: bool,
}

impl<T> BatchReport<T> {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Count line followed by one line per failure cause.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} succeeded, {} failed of {}",
            self.success_count(),
            self.failure_count(),
            self.total
        );
        if self.cancelled {
            text.push_str(" (cancelled)");
        }
        for failure in &self.failed {
            text.push_str(&format!(
                "\n- {}: [{}] {}",
                failure.item, failure.kind, failure.cause
            ));
        }
        text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableValidation {
    pub key: MetadataKey,
    pub status: ValidationStatus,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub passed: usize,
    pub failed: usize,
    pub not_validated: usize,
    pub failing_tables: Vec<String>,
    pub outcomes: Vec<TableValidation>,
    pub cancelled: bool,
}

impl ValidationSummary {
    pub fn record(&mut self, outcome: TableValidation) {
        match outcome.status {
            ValidationStatus::Pass => self.passed += 1,
            ValidationStatus::Fail => {
                self.failed += 1;
                self.failing_tables.push(outcome.key.to_string());
            }
            ValidationStatus::NotValidated => self.not_validated += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn summary(&self) -> String {
        let mut text = format!(
            "{} passed, {} failed, {} not validated",
            self.passed, self.failed, self.not_validated
        );
        for outcome in self
            .outcomes
            .iter()
            .filter(|o| o.status == ValidationStatus::Fail)
        {
            text.push_str(&format!(
                "\n- {}: {}",
                outcome.key,
                outcome.reason.as_deref().unwrap_or("content hash mismatch")
            ));
        }
        text
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub backfilled: Vec<MetadataKey>,
    pub missing_source: Vec<MetadataKey>,
    pub failed: Vec<BatchFailure>,
}
