// ============================================================
// IMPORTER
// ============================================================
// XML fragments -> typed rows, remembering how the source was encoded

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use encoding_rs::Encoding;
use tracing::{debug, info, warn};

use super::content_hasher::{fragment_name, ContentHasher, HashInput};
use crate::domain::encoding_metadata::{ImportRecord, MetadataKey};
use crate::domain::error::{Result, SyncError};
use crate::domain::job::JobContext;
use crate::domain::report::{ImportResult, RowError};
use crate::domain::schema::TableSchema;
use crate::domain::value::{convert_value, TypedRecord};
use crate::infrastructure::db::{schema_catalog, table_rows, Database, EncodingMetadataStore};
use crate::infrastructure::encoding::{decode_bytes, read_source, DetectedEncoding};
use crate::infrastructure::xml::{parse_document, XmlDocument, XmlRow};

/// Per-value rewrite applied before type conversion, e.g. machine translation.
#[async_trait]
pub trait ColumnRewriter: Send + Sync {
    async fn rewrite(&self, column: &str, value: &str) -> Result<String>;
}

/// Rewrite hook together with the columns it applies to.
#[derive(Clone)]
pub struct ColumnRewrite {
    pub columns: Vec<String>,
    pub rewriter: Arc<dyn ColumnRewriter>,
}

#[derive(Clone)]
pub struct ImportRequest {
    pub table_name: String,
    pub partition: Option<String>,
    /// Ordered fragment files of one logical table.
    pub sources: Vec<PathBuf>,
    /// Columns to store; the others are stored as NULL. `None` selects all.
    pub columns: Option<Vec<String>>,
    pub rewrite: Option<ColumnRewrite>,
}

impl ImportRequest {
    pub fn file(table_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::fragments(table_name, vec![path.into()])
    }

    pub fn fragments(table_name: impl Into<String>, sources: Vec<PathBuf>) -> Self {
        Self {
            table_name: table_name.into(),
            partition: None,
            sources,
            columns: None,
            rewrite: None,
        }
    }

    /// A file, or a directory whose `*.xml` files are the fragments in name order.
    pub fn from_path(table_name: impl Into<String>, path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Ok(Self::file(table_name, path));
        }
        let mut sources: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(|e| SyncError::Io(format!("Failed to list {}: {}", path.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("xml"))
                        .unwrap_or(false)
            })
            .collect();
        sources.sort();
        if sources.is_empty() {
            return Err(SyncError::EmptySource(format!(
                "{} contains no .xml files",
                path.display()
            )));
        }
        Ok(Self::fragments(table_name, sources))
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn only_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_rewriter(mut self, columns: Vec<String>, rewriter: Arc<dyn ColumnRewriter>) -> Self {
        self.rewrite = Some(ColumnRewrite { columns, rewriter });
        self
    }

    pub fn key(&self) -> MetadataKey {
        MetadataKey::new(self.table_name.clone(), self.partition.as_deref())
    }
}

impl fmt::Debug for ImportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportRequest")
            .field("table_name", &self.table_name)
            .field("partition", &self.partition)
            .field("sources", &self.sources)
            .field("columns", &self.columns)
            .field(
                "rewrite_columns",
                &self.rewrite.as_ref().map(|r| r.columns.clone()),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub max_widenings_per_file: usize,
    pub legacy_encoding: &'static Encoding,
}

struct Fragment {
    name: String,
    path: PathBuf,
    detected: DetectedEncoding,
    document: XmlDocument,
}

/// Mutable bookkeeping for one import run.
struct ImportRun {
    schema: TableSchema,
    rows_imported: usize,
    row_errors: Vec<RowError>,
    widened_columns: Vec<(String, u32)>,
}

#[derive(Clone)]
pub struct Importer {
    db: Database,
    metadata: EncodingMetadataStore,
    hasher: ContentHasher,
    options: ImportOptions,
}

impl Importer {
    pub fn new(
        db: Database,
        metadata: EncodingMetadataStore,
        hasher: ContentHasher,
        options: ImportOptions,
    ) -> Self {
        Self {
            db,
            metadata,
            hasher,
            options,
        }
    }

    pub async fn import(&self, request: &ImportRequest, ctx: &JobContext) -> Result<ImportResult> {
        let start = Instant::now();
        let key = request.key();
        let guard = self
            .metadata
            .acquire(&request.table_name, request.partition.as_deref())
            .await;

        if request.sources.is_empty() {
            return Err(SyncError::Validation(format!("{}: no source files given", key)));
        }
        // Rows are tied to their fragment by file name, which must be unique per key.
        let mut names = HashSet::with_capacity(request.sources.len());
        for path in &request.sources {
            let name = fragment_name(path);
            if !names.insert(name.clone()) {
                return Err(SyncError::Validation(format!(
                    "{}: more than one source is named {}",
                    key, name
                )));
            }
        }
        // Every fragment must be readable before anything is replaced.
        let mut raw = Vec::with_capacity(request.sources.len());
        for path in &request.sources {
            raw.push((path.clone(), read_source(path)?));
        }

        let schema = schema_catalog::require_schema(self.db.pool(), &request.table_name).await?;
        let selected = selected_columns(&schema, request.columns.as_deref())?;

        let mut fragments = Vec::with_capacity(raw.len());
        for (path, bytes) in raw {
            let decoded = decode_bytes(&bytes, self.options.legacy_encoding)?;
            let document = parse_document(&decoded.text, Some(&schema.row_tag))?;
            fragments.push(Fragment {
                name: fragment_name(&path),
                path,
                detected: decoded.detected,
                document,
            });
        }

        let primary = fragments[0].detected;
        for fragment in &fragments[1..] {
            if fragment.detected != primary {
                warn!(
                    key = %key,
                    fragment = %fragment.name,
                    encoding = fragment.detected.name(),
                    recorded = primary.name(),
                    "Fragment encoding differs from the first fragment"
                );
            }
        }

        let content_hash = {
            let inputs: Vec<HashInput<'_>> = fragments
                .iter()
                .map(|f| HashInput {
                    fragment: &f.name,
                    document: &f.document,
                })
                .collect();
            self.hasher.hash_documents(&inputs)
        };

        let unknown_fields = unknown_fields(&schema, &fragments);
        if !unknown_fields.is_empty() {
            warn!(
                key = %key,
                fields = ?unknown_fields,
                "Source has fields without a column, they are not stored"
            );
        }

        let rows_total: usize = fragments.iter().map(|f| f.document.rows.len()).sum();
        let mut run = ImportRun {
            schema,
            rows_imported: 0,
            row_errors: Vec::new(),
            widened_columns: Vec::new(),
        };

        info!(
            key = %key,
            fragments = fragments.len(),
            rows = rows_total,
            encoding = primary.name(),
            bom = primary.has_bom,
            "Importing table"
        );

        let cancelled = self
            .store_rows(request, &key, &fragments, &selected, rows_total, &mut run, ctx)
            .await?;

        let result = ImportResult {
            key: key.clone(),
            fragments: fragments.iter().map(|f| f.name.clone()).collect(),
            encoding: primary.name().to_string(),
            has_bom: primary.has_bom,
            content_hash: content_hash.clone(),
            rows_total,
            rows_imported: run.rows_imported,
            row_errors: run.row_errors,
            widened_columns: run.widened_columns,
            unknown_fields,
            cancelled,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        if cancelled {
            warn!(key = %key, imported = result.rows_imported, "Import cancelled, metadata left unchanged");
            return Ok(result);
        }

        let source_path = if fragments.len() == 1 {
            fragments[0].path.display().to_string()
        } else {
            fragments[0]
                .path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .display()
                .to_string()
        };
        self.metadata
            .record_import(
                &guard,
                &ImportRecord {
                    encoding: primary.name().to_string(),
                    has_bom: primary.has_bom,
                    content_hash,
                    source_path: Some(source_path),
                    imported_at: Utc::now(),
                },
            )
            .await?;

        info!("{}", result.summary());
        Ok(result)
    }

    /// Replace the partition and insert rows batch by batch; returns whether it was cancelled.
    #[allow(clippy::too_many_arguments)]
    async fn store_rows(
        &self,
        request: &ImportRequest,
        key: &MetadataKey,
        fragments: &[Fragment],
        selected: &[bool],
        rows_total: usize,
        run: &mut ImportRun,
        ctx: &JobContext,
    ) -> Result<bool> {
        let batch_size = self.options.batch_size.max(1);
        let rows: Vec<(&Fragment, usize, &XmlRow)> = fragments
            .iter()
            .flat_map(|fragment| {
                fragment
                    .document
                    .rows
                    .iter()
                    .enumerate()
                    .map(move |(row_index, row)| (fragment, row_index, row))
            })
            .collect();

        if rows.is_empty() {
            let mut tx = self.db.pool().begin().await?;
            table_rows::delete_partition(&mut *tx, &key.table_name, &key.partition).await?;
            tx.commit().await?;
            ctx.report(0, 0, key.to_string());
            return Ok(false);
        }

        let mut processed = 0usize;
        let mut partition_cleared = false;
        let mut widenings = 0usize;

        for batch in rows.chunks(batch_size) {
            if ctx.checkpoint().is_err() {
                return Ok(true);
            }

            // Rewrites may call out to slow services; run them before the transaction opens.
            let mut prepared = Vec::with_capacity(batch.len());
            for (fragment, row_index, row) in batch {
                match self.to_record(request, &run.schema, selected, row).await {
                    Ok(record) => prepared.push((*fragment, *row_index, record)),
                    Err(err) => {
                        warn!(key = %key, fragment = %fragment.name, row = row_index, error = %err, "Skipping row");
                        run.row_errors.push(RowError {
                            row_index: *row_index,
                            fragment: fragment.name.clone(),
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }

            let mut tx = self.db.pool().begin().await?;
            if !partition_cleared {
                let removed =
                    table_rows::delete_partition(&mut *tx, &key.table_name, &key.partition).await?;
                debug!(key = %key, removed, "Cleared partition before import");
                partition_cleared = true;
            }

            for (fragment, row_index, record) in &prepared {
                let mut widened_this_row = false;
                loop {
                    let inserted = table_rows::insert_row(
                        &mut *tx,
                        &run.schema,
                        &key.partition,
                        &fragment.name,
                        record,
                    )
                    .await;
                    let err = match inserted {
                        Ok(()) => {
                            run.rows_imported += 1;
                            break;
                        }
                        Err(err) => err,
                    };

                    if let Some(column) = table_rows::overflow_column(&err) {
                        if !widened_this_row && widenings < self.options.max_widenings_per_file {
                            let new_len =
                                schema_catalog::widen_column(&mut *tx, &mut run.schema, &column)
                                    .await?;
                            widenings += 1;
                            widened_this_row = true;
                            run.widened_columns.push((column, new_len));
                            continue;
                        }
                        let declared = run
                            .schema
                            .column(&column)
                            .and_then(|c| c.max_length)
                            .unwrap_or_default();
                        let overflow = SyncError::ColumnOverflow {
                            table: key.table_name.clone(),
                            column,
                            declared,
                        };
                        warn!(key = %key, fragment = %fragment.name, row = row_index, error = %overflow, "Skipping row");
                        run.row_errors.push(RowError {
                            row_index: *row_index,
                            fragment: fragment.name.clone(),
                            kind: overflow.kind().to_string(),
                            message: overflow.to_string(),
                        });
                        break;
                    }

                    // Constraint-level failures cost one row; anything else is a resource problem.
                    if matches!(err, sqlx::Error::Database(_)) {
                        warn!(key = %key, fragment = %fragment.name, row = row_index, error = %err, "Skipping row");
                        run.row_errors.push(RowError {
                            row_index: *row_index,
                            fragment: fragment.name.clone(),
                            kind: "DatabaseError".to_string(),
                            message: err.to_string(),
                        });
                        break;
                    }
                    return Err(err.into());
                }
            }
            tx.commit().await?;

            processed += batch.len();
            ctx.report(processed as u64, rows_total as u64, key.to_string());
            debug!(key = %key, processed, total = rows_total, "Import batch committed");
        }

        Ok(false)
    }

    /// Flatten a row into column order, applying the rewrite hook first.
    async fn to_record(
        &self,
        request: &ImportRequest,
        schema: &TableSchema,
        selected: &[bool],
        row: &XmlRow,
    ) -> Result<TypedRecord> {
        let mut record = TypedRecord::nulls(schema.columns.len());
        for field in &row.fields {
            let Some(idx) = schema.column_index_by_path(&field.path) else {
                continue;
            };
            if !selected[idx] {
                continue;
            }
            let column = &schema.columns[idx];

            let mut value = field.value.clone();
            if let Some(rewrite) = &request.rewrite {
                if rewrite.columns.iter().any(|c| c == &column.name) {
                    match rewrite.rewriter.rewrite(&column.name, &value).await {
                        Ok(rewritten) => value = rewritten,
                        Err(err) => warn!(
                            table = %schema.table_name,
                            column = %column.name,
                            error = %err,
                            "Rewrite hook failed, keeping original value"
                        ),
                    }
                }
            }

            record.values[idx] = convert_value(column, &value).map_err(SyncError::ValueType)?;
        }
        Ok(record)
    }
}

fn selected_columns(schema: &TableSchema, columns: Option<&[String]>) -> Result<Vec<bool>> {
    let Some(columns) = columns else {
        return Ok(vec![true; schema.columns.len()]);
    };
    let wanted: HashSet<&str> = columns.iter().map(String::as_str).collect();
    for name in &wanted {
        if schema.column(name).is_none() {
            return Err(SyncError::Validation(format!(
                "table {} has no column {}",
                schema.table_name, name
            )));
        }
    }
    Ok(schema
        .columns
        .iter()
        .map(|c| wanted.contains(c.name.as_str()))
        .collect())
}

fn unknown_fields(schema: &TableSchema, fragments: &[Fragment]) -> Vec<String> {
    let mut unknown = BTreeSet::new();
    for fragment in fragments {
        for row in &fragment.document.rows {
            for field in &row.fields {
                if schema.column_index_by_path(&field.path).is_none() {
                    unknown.insert(field.path.field_name());
                }
            }
        }
    }
    unknown.into_iter().collect()
}
