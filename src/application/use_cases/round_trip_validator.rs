// ============================================================
// ROUND-TRIP VALIDATOR
// ============================================================
// Scratch export + re-hash, compared with the hash taken at import

use std::path::PathBuf;

use encoding_rs::Encoding;
use tracing::{info, warn};

use super::content_hasher::ContentHasher;
use super::exporter::{ExportRequest, Exporter};
use crate::domain::encoding_metadata::{EncodingMetadata, MetadataKey, ValidationStatus};
use crate::domain::error::{Result, SyncError};
use crate::domain::job::JobContext;
use crate::domain::report::{TableValidation, ValidationSummary};
use crate::infrastructure::db::{EncodingMetadataStore, KeyGuard};
use crate::infrastructure::encoding::{detect_encoding, read_source};

#[derive(Clone)]
pub struct RoundTripValidator {
    metadata: EncodingMetadataStore,
    exporter: Exporter,
    hasher: ContentHasher,
    scratch_root: PathBuf,
    legacy: &'static Encoding,
}

impl RoundTripValidator {
    pub fn new(
        metadata: EncodingMetadataStore,
        exporter: Exporter,
        hasher: ContentHasher,
        scratch_root: PathBuf,
        legacy: &'static Encoding,
    ) -> Self {
        Self {
            metadata,
            exporter,
            hasher,
            scratch_root,
            legacy,
        }
    }

    /// Validate every catalogued partition of one table.
    pub async fn validate_table(&self, table_name: &str, ctx: &JobContext) -> Result<ValidationSummary> {
        let entries = self.metadata.list_for_table(table_name).await?;
        if entries.is_empty() {
            return Err(SyncError::NotFound(format!(
                "no encoding metadata for table {}",
                table_name
            )));
        }
        self.validate_entries(entries, ctx).await
    }

    /// Validate every catalogued entry; one failure never stops the others.
    pub async fn validate_all(&self, ctx: &JobContext) -> Result<ValidationSummary> {
        let entries = self.metadata.list().await?;
        self.validate_entries(entries, ctx).await
    }

    pub async fn validate_key(&self, key: &MetadataKey, ctx: &JobContext) -> Result<TableValidation> {
        let guard = self.metadata.acquire(&key.table_name, key.partition_opt()).await;
        let meta = self.metadata.require(key).await?;
        self.validate_locked(&guard, &meta, ctx).await
    }

    async fn validate_entries(
        &self,
        entries: Vec<EncodingMetadata>,
        ctx: &JobContext,
    ) -> Result<ValidationSummary> {
        let mut summary = ValidationSummary::default();
        let total = entries.len() as u64;

        for (done, entry) in entries.into_iter().enumerate() {
            if ctx.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let item_ctx = JobContext::new().with_cancellation(ctx.cancellation().clone());
            match self.validate_key(&entry.key, &item_ctx).await {
                Ok(outcome) => summary.record(outcome),
                Err(SyncError::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Err(err) if err.is_resource_failure() => return Err(err),
                Err(err) => {
                    warn!(key = %entry.key, error = %err, "Validation could not run");
                    summary.record(TableValidation {
                        key: entry.key.clone(),
                        status: ValidationStatus::NotValidated,
                        expected_hash: entry.original_content_hash.clone(),
                        actual_hash: None,
                        reason: Some(err.to_string()),
                    });
                }
            }
            ctx.report(done as u64 + 1, total, entry.key.to_string());
        }

        info!(
            passed = summary.passed,
            failed = summary.failed,
            not_validated = summary.not_validated,
            "Round-trip validation finished"
        );
        Ok(summary)
    }

    async fn validate_locked(
        &self,
        guard: &KeyGuard,
        meta: &EncodingMetadata,
        ctx: &JobContext,
    ) -> Result<TableValidation> {
        let key = meta.key.clone();
        let Some(expected) = meta.original_content_hash.clone() else {
            return Ok(TableValidation {
                key,
                status: ValidationStatus::NotValidated,
                expected_hash: None,
                actual_hash: None,
                reason: Some("no original content hash recorded".to_string()),
            });
        };

        let scratch = self.scratch_root.join(uuid::Uuid::new_v4().to_string());
        let checked = self.check_scratch_export(guard, meta, &scratch, ctx).await;
        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            if scratch.exists() {
                warn!(path = %scratch.display(), error = %e, "Failed to remove scratch export");
            }
        }

        let (actual, reason) = match checked {
            Ok(outcome) => outcome,
            Err(err @ (SyncError::Database(_) | SyncError::Cancelled)) => return Err(err),
            Err(err) => (None, Some(format!("scratch export failed: {}", err))),
        };
        let status = if reason.is_none() && actual.as_deref() == Some(expected.as_str()) {
            ValidationStatus::Pass
        } else {
            ValidationStatus::Fail
        };
        let reason = match (status, reason) {
            (ValidationStatus::Fail, None) => Some("content hash mismatch".to_string()),
            (_, reason) => reason,
        };

        self.metadata.record_validation(guard, status).await?;
        if status == ValidationStatus::Fail {
            warn!(key = %key, reason = reason.as_deref().unwrap_or_default(), "Round-trip validation failed");
        }

        Ok(TableValidation {
            key,
            status,
            expected_hash: Some(expected),
            actual_hash: actual,
            reason,
        })
    }

    /// Export to scratch and return the re-computed hash plus any encoding mismatch.
    async fn check_scratch_export(
        &self,
        guard: &KeyGuard,
        meta: &EncodingMetadata,
        scratch: &std::path::Path,
        ctx: &JobContext,
    ) -> Result<(Option<String>, Option<String>)> {
        let mut request = ExportRequest::new(meta.key.table_name.clone(), scratch).scratch();
        request.partition = meta.key.partition_opt().map(str::to_string);
        let exported = self.exporter.export_locked(guard, &request, ctx).await?;

        let actual = self
            .hasher
            .hash_files(&exported.output_paths, self.legacy, None)?;

        let mut reason = None;
        if let Some(first) = exported.output_paths.first() {
            let detected = detect_encoding(&read_source(first)?, self.legacy);
            if detected.name() != meta.original_encoding || detected.has_bom != meta.has_bom {
                reason = Some(format!(
                    "export is {} (BOM: {}) but source was {} (BOM: {})",
                    detected.name(),
                    detected.has_bom,
                    meta.original_encoding,
                    meta.has_bom
                ));
            }
        }
        Ok((Some(actual), reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::FieldPath;
    use crate::test_support::{skill_document, write_encoded, TestEngine};

    #[tokio::test]
    async fn test_round_trip_passes_for_utf16_source() {
        let engine = TestEngine::new().await;
        let source = write_encoded(
            engine.dir(),
            "skill.xml",
            &skill_document(500),
            encoding_rs::UTF_16LE,
            true,
        );
        engine.import_new("skill_base_client", &[source]).await;

        let summary = engine
            .validator()
            .validate_table("skill_base_client", &JobContext::new())
            .await
            .unwrap();
        assert_eq!(summary.passed, 1, "{}", summary.summary());
        assert_eq!(summary.failed, 0);

        let meta = engine.metadata("skill_base_client", None).await;
        assert_eq!(meta.last_validation_result, ValidationStatus::Pass);
        // validation exports do not count as publishes
        assert_eq!(meta.export_count, 0);
    }

    #[tokio::test]
    async fn test_changed_rows_fail_validation() {
        let engine = TestEngine::new().await;
        let source = write_encoded(engine.dir(), "skill.xml", &skill_document(5), encoding_rs::GBK, false);
        engine.import_new("skill_base_client", &[source]).await;

        sqlx::query("UPDATE skill_base_client SET name = 'patched' WHERE id = 3")
            .execute(engine.engine().database().pool())
            .await
            .unwrap();

        let summary = engine.validator().validate_all(&JobContext::new()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failing_tables, vec!["skill_base_client".to_string()]);
        let meta = engine.metadata("skill_base_client", None).await;
        assert_eq!(meta.last_validation_result, ValidationStatus::Fail);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_tables() {
        let engine = TestEngine::new().await;
        let skill = write_encoded(engine.dir(), "skill.xml", &skill_document(3), encoding_rs::UTF_8, false);
        engine.import_new("skill_base_client", &[skill]).await;
        let item = write_encoded(
            engine.dir(),
            "item.xml",
            "<items><item id=\"1\"><name>Sword</name></item></items>",
            encoding_rs::UTF_8,
            false,
        );
        engine.import_new("item", &[item]).await;

        sqlx::query("DELETE FROM item")
            .execute(engine.engine().database().pool())
            .await
            .unwrap();

        let summary = engine.validator().validate_all(&JobContext::new()).await.unwrap();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failing_tables, vec!["item".to_string()]);
    }

    #[tokio::test]
    async fn test_text_valued_rows_survive_the_round_trip() {
        let engine = TestEngine::new().await;
        let source = write_encoded(
            engine.dir(),
            "strings.xml",
            "<strings><string id=\"1\">Hello</string><string id=\"2\">World</string></strings>",
            encoding_rs::UTF_8,
            false,
        );
        engine.import_new("strings", &[source]).await;

        let summary = engine.validator().validate_table("strings", &JobContext::new()).await.unwrap();
        assert_eq!(summary.passed, 1, "{}", summary.summary());

        let out = engine.dir().join("out");
        engine
            .exporter()
            .export(&ExportRequest::new("strings", &out), &JobContext::new())
            .await
            .unwrap();
        let text = std::fs::read_to_string(out.join("strings.xml")).unwrap();
        assert!(text.contains("<string id=\"1\">Hello</string>"), "{}", text);
        assert!(text.contains("<string id=\"2\">World</string>"), "{}", text);

        // the text takes part in the hash
        sqlx::query("UPDATE strings SET \"#text\" = 'Bye' WHERE id = 2")
            .execute(engine.engine().database().pool())
            .await
            .unwrap();
        let summary = engine.validator().validate_table("strings", &JobContext::new()).await.unwrap();
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_empty_repeated_sibling_keeps_later_positions() {
        let engine = TestEngine::new().await;
        let source = write_encoded(
            engine.dir(),
            "drop.xml",
            "<drops>\
             <drop id=\"1\"><items><item>100</item><item></item><item>300</item></items></drop>\
             <drop id=\"2\"><items><item>1</item><item>2</item><item>3</item></items></drop>\
             </drops>",
            encoding_rs::UTF_8,
            false,
        );
        engine.import_new("drop", &[source]).await;

        let summary = engine.validator().validate_table("drop", &JobContext::new()).await.unwrap();
        assert_eq!(summary.passed, 1, "{}", summary.summary());

        let out = engine.dir().join("out");
        engine
            .exporter()
            .export(&ExportRequest::new("drop", &out), &JobContext::new())
            .await
            .unwrap();
        let text = std::fs::read_to_string(out.join("drop.xml")).unwrap();
        let doc = crate::infrastructure::xml::parse_document(&text, Some("drop")).unwrap();
        let third = FieldPath::element(vec!["items".into(), "item[3]".into()]);
        assert_eq!(doc.rows[0].get(&third), Some("300"));
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let engine = TestEngine::new().await;
        let err = engine
            .validator()
            .validate_table("nope", &JobContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
