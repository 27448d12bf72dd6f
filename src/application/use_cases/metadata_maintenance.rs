// ============================================================
// METADATA MAINTENANCE
// ============================================================
// Backfill encoding records for legacy tables, drop orphaned ones

use std::path::{Path, PathBuf};

use chrono::Utc;
use encoding_rs::Encoding;
use tracing::{info, warn};

use super::content_hasher::ContentHasher;
use crate::domain::encoding_metadata::{ImportRecord, MetadataKey};
use crate::domain::error::{Result, SyncError};
use crate::domain::job::JobContext;
use crate::domain::report::{BackfillReport, BatchFailure};
use crate::infrastructure::db::{schema_catalog, table_rows, Database, EncodingMetadataStore};
use crate::infrastructure::encoding::{detect_encoding, read_source};

#[derive(Clone)]
pub struct MetadataMaintenance {
    db: Database,
    metadata: EncodingMetadataStore,
    hasher: ContentHasher,
    legacy: &'static Encoding,
}

impl MetadataMaintenance {
    pub fn new(
        db: Database,
        metadata: EncodingMetadataStore,
        hasher: ContentHasher,
        legacy: &'static Encoding,
    ) -> Self {
        Self {
            db,
            metadata,
            hasher,
            legacy,
        }
    }

    /// Reconstruct metadata for partitions that hold rows but were never imported here.
    ///
    /// Fragments are looked up as `<dir>/<partition>/<fragment>` first, then
    /// `<dir>/<fragment>`.
    pub async fn backfill(&self, source_dir: &Path, ctx: &JobContext) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();
        let pool = self.db.pool();

        for table in schema_catalog::list_tables(pool).await? {
            if !schema_catalog::data_table_exists(pool, &table).await? {
                continue;
            }
            let Some(schema) = schema_catalog::load_schema(pool, &table).await? else {
                continue;
            };

            for partition in table_rows::list_partitions(pool, &table).await? {
                ctx.checkpoint()?;
                let key = MetadataKey::new(table.clone(), Some(&partition));
                if self.metadata.get(&key).await?.is_some() {
                    continue;
                }

                let fragments = table_rows::list_fragments(pool, &table, &partition).await?;
                let located: Option<Vec<PathBuf>> = fragments
                    .iter()
                    .map(|fragment| locate_fragment(source_dir, &partition, fragment))
                    .collect();
                let Some(paths) = located else {
                    warn!(key = %key, dir = %source_dir.display(), "No source files found for backfill");
                    report.missing_source.push(key);
                    continue;
                };

                match self.backfill_one(&key, &paths, &schema.row_tag).await {
                    Ok(true) => report.backfilled.push(key),
                    Ok(false) => {}
                    Err(err) if err.is_resource_failure() => return Err(err),
                    Err(err) => {
                        warn!(key = %key, error = %err, "Backfill failed");
                        report.failed.push(BatchFailure {
                            item: key.to_string(),
                            kind: err.kind().to_string(),
                            cause: err.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            backfilled = report.backfilled.len(),
            missing = report.missing_source.len(),
            failed = report.failed.len(),
            "Metadata backfill finished"
        );
        Ok(report)
    }

    async fn backfill_one(&self, key: &MetadataKey, paths: &[PathBuf], row_tag: &str) -> Result<bool> {
        let first = paths
            .first()
            .ok_or_else(|| SyncError::NotFound(format!("{} has no fragments", key)))?;
        let detected = detect_encoding(&read_source(first)?, self.legacy);
        let content_hash = self.hasher.hash_files(paths, self.legacy, Some(row_tag))?;

        let source_path = if paths.len() == 1 {
            first.display().to_string()
        } else {
            first
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .display()
                .to_string()
        };

        let guard = self
            .metadata
            .acquire(&key.table_name, key.partition_opt())
            .await;
        self.metadata
            .insert_backfilled(
                &guard,
                &ImportRecord {
                    encoding: detected.name().to_string(),
                    has_bom: detected.has_bom,
                    content_hash,
                    source_path: Some(source_path),
                    imported_at: Utc::now(),
                },
            )
            .await
    }

    /// Delete metadata whose data table no longer exists.
    pub async fn cleanup_orphans(&self) -> Result<Vec<MetadataKey>> {
        let mut removed = Vec::new();
        for entry in self.metadata.list().await? {
            if schema_catalog::data_table_exists(self.db.pool(), &entry.key.table_name).await? {
                continue;
            }
            let guard = self
                .metadata
                .acquire(&entry.key.table_name, entry.key.partition_opt())
                .await;
            if self.metadata.delete(&guard).await? {
                info!(key = %entry.key, "Removed orphaned encoding metadata");
                removed.push(entry.key);
            }
        }
        Ok(removed)
    }
}

fn locate_fragment(source_dir: &Path, partition: &str, fragment: &str) -> Option<PathBuf> {
    let mut candidates = Vec::with_capacity(2);
    if !partition.is_empty() {
        candidates.push(source_dir.join(partition).join(fragment));
    }
    candidates.push(source_dir.join(fragment));
    candidates.into_iter().find(|p| p.is_file())
}
