// ============================================================
// EXPORTER
// ============================================================
// Typed rows -> XML fragments in the charset they were imported from

use std::path::{Path, PathBuf};
use std::time::Instant;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use tracing::{debug, info};

use super::field_filter::{FieldFilter, FilterStats};
use crate::domain::encoding_metadata::MetadataKey;
use crate::domain::error::{Result, SyncError};
use crate::domain::job::JobContext;
use crate::domain::report::ExportResult;
use crate::domain::schema::TableSchema;
use crate::infrastructure::db::table_rows::{self, StoredRow};
use crate::infrastructure::db::{schema_catalog, Database, EncodingMetadataStore, KeyGuard};
use crate::infrastructure::encoding::{encode, encoding_for_name};
use crate::infrastructure::xml::{write_document, XmlField, XmlRow};

const PROGRESS_EVERY: usize = 500;

/// Whether an export is a real publish or a throwaway validation copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Counts towards `export_count`.
    Publish,
    /// Leaves counters alone.
    Scratch,
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub table_name: String,
    pub partition: Option<String>,
    /// Directory receiving one file per fragment.
    pub destination: PathBuf,
    pub mode: ExportMode,
}

impl ExportRequest {
    pub fn new(table_name: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            table_name: table_name.into(),
            partition: None,
            destination: destination.into(),
            mode: ExportMode::Publish,
        }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn scratch(mut self) -> Self {
        self.mode = ExportMode::Scratch;
        self
    }

    pub fn key(&self) -> MetadataKey {
        MetadataKey::new(self.table_name.clone(), self.partition.as_deref())
    }
}

#[derive(Clone)]
pub struct Exporter {
    db: Database,
    metadata: EncodingMetadataStore,
    filter: FieldFilter,
}

impl Exporter {
    pub fn new(db: Database, metadata: EncodingMetadataStore, filter: FieldFilter) -> Self {
        Self {
            db,
            metadata,
            filter,
        }
    }

    pub async fn export(&self, request: &ExportRequest, ctx: &JobContext) -> Result<ExportResult> {
        let guard = self
            .metadata
            .acquire(&request.table_name, request.partition.as_deref())
            .await;
        self.export_locked(&guard, request, ctx).await
    }

    /// Export while the caller already holds the key guard.
    pub async fn export_locked(
        &self,
        guard: &KeyGuard,
        request: &ExportRequest,
        ctx: &JobContext,
    ) -> Result<ExportResult> {
        let start = Instant::now();
        let key = request.key();
        if guard.key() != &key {
            return Err(SyncError::Validation(format!(
                "guard for {} cannot export {}",
                guard.key(),
                key
            )));
        }

        let schema = schema_catalog::require_schema(self.db.pool(), &request.table_name).await?;
        let meta = self.metadata.require(&key).await?;
        let encoding = encoding_for_name(&meta.original_encoding).ok_or_else(|| {
            SyncError::Encoding(format!(
                "{}: recorded encoding '{}' is unknown",
                key, meta.original_encoding
            ))
        })?;

        let stored = table_rows::fetch_rows(self.db.pool(), &schema, &key.partition).await?;
        let total = stored.len();
        let mut stats = FilterStats::default();
        let mut groups: Vec<(String, Vec<XmlRow>)> = Vec::new();

        for (position, row) in stored.into_iter().enumerate() {
            if position % PROGRESS_EVERY == 0 {
                ctx.checkpoint()?;
                ctx.report(position as u64, total as u64, key.to_string());
            }
            let fragment = if row.fragment.is_empty() {
                default_fragment(&schema)
            } else {
                row.fragment.clone()
            };
            let xml_row = self.filter.filter_row(&schema.row_tag, to_xml_row(&schema, &row), &mut stats);
            match groups.iter_mut().find(|(name, _)| name == &fragment) {
                Some((_, rows)) => rows.push(xml_row),
                None => groups.push((fragment, vec![xml_row])),
            }
        }
        if groups.is_empty() {
            groups.push((default_fragment(&schema), Vec::new()));
        }

        std::fs::create_dir_all(&request.destination).map_err(|e| {
            SyncError::Io(format!(
                "Failed to create {}: {}",
                request.destination.display(),
                e
            ))
        })?;

        let mut output_paths = Vec::with_capacity(groups.len());
        for (fragment, rows) in &groups {
            let text = write_document(
                &schema.root_tag,
                &schema.row_tag,
                rows,
                declaration_label(encoding),
            )?;
            let bytes = encode(&text, encoding, meta.has_bom)?;
            let target = request.destination.join(safe_file_name(fragment, &schema));
            write_atomically(&target, &bytes)?;
            verify_output(&target)?;
            debug!(key = %key, path = %target.display(), rows = rows.len(), "Wrote fragment");
            output_paths.push(target);
        }
        ctx.report(total as u64, total as u64, key.to_string());

        if request.mode == ExportMode::Publish {
            self.metadata.record_export(guard).await?;
        }

        let result = ExportResult {
            key,
            output_paths,
            rows_exported: total,
            fields_dropped: stats.dropped,
            fields_rewritten: stats.rewritten,
            encoding: encoding.name().to_string(),
            has_bom: meta.has_bom,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        if request.mode == ExportMode::Publish {
            info!("{}", result.summary());
        }
        Ok(result)
    }
}

fn to_xml_row(schema: &TableSchema, row: &StoredRow) -> XmlRow {
    let fields = schema
        .columns
        .iter()
        .zip(&row.record.values)
        .filter_map(|(column, value)| {
            value.render(column).map(|value| XmlField {
                path: column.path.clone(),
                value,
            })
        })
        .collect();
    XmlRow { fields }
}

fn default_fragment(schema: &TableSchema) -> String {
    format!("{}.xml", schema.table_name)
}

fn safe_file_name(fragment: &str, schema: &TableSchema) -> String {
    let unsafe_name = fragment.is_empty()
        || fragment == "."
        || fragment == ".."
        || fragment.contains(['/', '\\']);
    if unsafe_name {
        default_fragment(schema)
    } else {
        fragment.to_string()
    }
}

/// Label written into the XML declaration.
fn declaration_label(encoding: &'static Encoding) -> &'static str {
    if encoding == UTF_16LE || encoding == UTF_16BE {
        "UTF-16"
    } else {
        encoding.name()
    }
}

fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    std::fs::write(&temp, bytes)
        .map_err(|e| SyncError::Io(format!("Failed to write {}: {}", temp.display(), e)))?;
    if let Err(e) = std::fs::rename(&temp, target) {
        let _ = std::fs::remove_file(&temp);
        return Err(SyncError::Io(format!(
            "Failed to move export into {}: {}",
            target.display(),
            e
        )));
    }
    Ok(())
}

fn verify_output(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(SyncError::ExportIntegrity(format!(
            "{} is empty after write",
            path.display()
        ))),
        Err(e) => Err(SyncError::ExportIntegrity(format!(
            "{} missing after write: {}",
            path.display(),
            e
        ))),
    }
}
