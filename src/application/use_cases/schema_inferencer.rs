// ============================================================
// SCHEMA INFERENCER
// ============================================================
// Derive a typed relational schema from sampled XML documents

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use encoding_rs::Encoding;

use super::content_hasher::fragment_name;
use crate::domain::error::{Result, SyncError};
use crate::domain::schema::{
    validate_table_name, ColumnDef, ColumnType, DateTimeFormat, FieldPath, TableSchema,
    RESERVED_COLUMNS,
};
use crate::domain::sync_config::SyncConfig;
use crate::domain::value::{detect_datetime_format, parse_datetime, parse_float, parse_integer};
use crate::infrastructure::db::{schema_catalog, Database};
use crate::infrastructure::encoding::read_and_decode;
use crate::infrastructure::xml::{parse_document, XmlDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceOptions {
    /// Rows inspected across all documents, 0 inspects everything.
    pub sample_rows: usize,
    pub varchar_min_length: u32,
    pub varchar_headroom_percent: u32,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl InferenceOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            sample_rows: config.sample_rows,
            varchar_min_length: config.varchar_min_length,
            varchar_headroom_percent: config.varchar_headroom_percent,
        }
    }

    fn varchar_length(&self, observed_chars: usize) -> u32 {
        let observed = observed_chars as u64;
        let with_headroom = (observed * (100 + u64::from(self.varchar_headroom_percent)) + 99) / 100;
        let len = u32::try_from(with_headroom).unwrap_or(u32::MAX);
        len.max(self.varchar_min_length)
    }
}

#[derive(Debug, Clone)]
pub struct InferredTable {
    pub schema: TableSchema,
    pub ddl: Vec<String>,
    pub rows_sampled: usize,
}

#[derive(Debug, Clone, Copy)]
enum DateTimeCandidate {
    Unseen,
    Consistent(DateTimeFormat),
    Rejected,
}

/// Running type evidence for one field path.
///
/// Each flag only ever flips from possible to impossible, so a field can
/// move toward VARCHAR but never back.
#[derive(Debug, Clone)]
struct FieldCandidate {
    path: FieldPath,
    rows_present: usize,
    non_empty: usize,
    integer: bool,
    float: bool,
    datetime: DateTimeCandidate,
    max_chars: usize,
}

impl FieldCandidate {
    fn new(path: FieldPath) -> Self {
        Self {
            path,
            rows_present: 0,
            non_empty: 0,
            integer: true,
            float: true,
            datetime: DateTimeCandidate::Unseen,
            max_chars: 0,
        }
    }

    fn observe(&mut self, raw: &str) {
        self.rows_present += 1;
        self.max_chars = self.max_chars.max(raw.chars().count());

        let value = raw.trim();
        if value.is_empty() {
            return;
        }
        self.non_empty += 1;

        if self.integer && parse_integer(value).is_none() {
            self.integer = false;
        }
        if self.float && parse_float(value).is_none() {
            self.float = false;
        }
        self.datetime = match self.datetime {
            DateTimeCandidate::Unseen => match detect_datetime_format(value) {
                Some(format) => DateTimeCandidate::Consistent(format),
                None => DateTimeCandidate::Rejected,
            },
            DateTimeCandidate::Consistent(format) if parse_datetime(value, format).is_none() => {
                DateTimeCandidate::Rejected
            }
            other => other,
        };
    }

    fn column_type(&self) -> (ColumnType, Option<DateTimeFormat>) {
        if self.non_empty == 0 {
            return (ColumnType::Varchar, None);
        }
        if self.integer {
            return (ColumnType::Integer, None);
        }
        if self.float {
            return (ColumnType::Float, None);
        }
        match self.datetime {
            DateTimeCandidate::Consistent(format) => (ColumnType::DateTime, Some(format)),
            _ => (ColumnType::Varchar, None),
        }
    }
}

/// Infer the schema of one logical table from its parsed documents.
pub fn infer_schema(
    table_name: &str,
    documents: &[XmlDocument],
    options: &InferenceOptions,
) -> Result<InferredTable> {
    validate_table_name(table_name).map_err(SyncError::Validation)?;

    let first = documents
        .first()
        .ok_or_else(|| SyncError::SchemaInference(format!("{}: no documents given", table_name)))?;
    let row_tag = pick_row_tag(table_name, documents)?;

    let mut candidates: Vec<FieldCandidate> = Vec::new();
    let mut index: HashMap<FieldPath, usize> = HashMap::new();
    let mut rows_sampled = 0usize;

    'documents: for document in documents {
        if document.root_tag != first.root_tag {
            tracing::warn!(
                table = %table_name,
                expected = %first.root_tag,
                found = %document.root_tag,
                "Sample documents disagree on the root element"
            );
        }
        for row in &document.rows {
            if options.sample_rows > 0 && rows_sampled >= options.sample_rows {
                break 'documents;
            }
            rows_sampled += 1;
            for field in &row.fields {
                let idx = *index.entry(field.path.clone()).or_insert_with(|| {
                    candidates.push(FieldCandidate::new(field.path.clone()));
                    candidates.len() - 1
                });
                candidates[idx].observe(&field.value);
            }
        }
    }

    let names = column_names(table_name, &candidates)?;
    let columns: Vec<ColumnDef> = candidates
        .iter()
        .zip(names)
        .map(|(candidate, name)| {
            let (inferred_type, datetime_format) = candidate.column_type();
            ColumnDef {
                name,
                path: candidate.path.clone(),
                inferred_type,
                max_length: (inferred_type == ColumnType::Varchar)
                    .then(|| options.varchar_length(candidate.max_chars)),
                nullable: candidate.rows_present < rows_sampled
                    || candidate.non_empty < candidate.rows_present,
                datetime_format,
            }
        })
        .collect();

    let schema = TableSchema {
        table_name: table_name.to_string(),
        root_tag: first.root_tag.clone(),
        row_tag,
        columns,
    };
    let ddl = schema.ddl();

    tracing::debug!(
        table = %table_name,
        rows = rows_sampled,
        columns = schema.columns.len(),
        "Inferred table schema"
    );

    Ok(InferredTable {
        schema,
        ddl,
        rows_sampled,
    })
}

fn pick_row_tag(table_name: &str, documents: &[XmlDocument]) -> Result<String> {
    let mut row_tag: Option<&str> = None;
    for document in documents {
        let Some(tag) = document.row_tag.as_deref() else {
            continue;
        };
        match row_tag {
            None => row_tag = Some(tag),
            Some(existing) if existing != tag => {
                return Err(SyncError::SchemaInference(format!(
                    "{}: documents use different row elements <{}> and <{}>",
                    table_name, existing, tag
                )));
            }
            Some(_) => {}
        }
    }

    let has_rows = documents.iter().any(|d| !d.rows.is_empty());
    match row_tag {
        Some(tag) if has_rows => Ok(tag.to_string()),
        _ => Err(SyncError::SchemaInference(format!(
            "{}: no repeating row element found beneath the root",
            table_name
        ))),
    }
}

/// Column names unique under SQLite's case-insensitive identifier rules.
///
/// A clash keeps the first field's name; later fields fall back to their
/// canonical key (`@id` for a row attribute) and then a numeric suffix.
fn column_names(table_name: &str, candidates: &[FieldCandidate]) -> Result<Vec<String>> {
    let mut taken: HashSet<String> = HashSet::new();
    let mut names = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let preferred = candidate.path.field_name();
        if RESERVED_COLUMNS
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(&preferred))
        {
            return Err(SyncError::SchemaInference(format!(
                "{}: field '{}' uses a reserved column name",
                table_name, preferred
            )));
        }

        let mut name = preferred.clone();
        if taken.contains(&name.to_ascii_lowercase()) {
            name = candidate.path.canonical_key();
        }
        let mut suffix = 2;
        while taken.contains(&name.to_ascii_lowercase()) {
            name = format!("{}~{}", preferred, suffix);
            suffix += 1;
        }
        taken.insert(name.to_ascii_lowercase());
        names.push(name);
    }
    Ok(names)
}

#[derive(Debug, Clone)]
pub struct SchemaInferencer {
    db: Database,
    options: InferenceOptions,
    legacy: &'static Encoding,
}

impl SchemaInferencer {
    pub fn new(db: Database, options: InferenceOptions, legacy: &'static Encoding) -> Self {
        Self {
            db,
            options,
            legacy,
        }
    }

    pub fn infer_from_documents(
        &self,
        table_name: &str,
        documents: &[XmlDocument],
    ) -> Result<InferredTable> {
        infer_schema(table_name, documents, &self.options)
    }

    /// Read and parse sample files; unreadable samples are inference failures.
    pub fn infer_from_files(&self, table_name: &str, paths: &[PathBuf]) -> Result<InferredTable> {
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = read_and_decode(path, self.legacy)
                .and_then(|decoded| parse_document(&decoded.text, None));
            match parsed {
                Ok(document) => documents.push(document),
                Err(
                    err @ (SyncError::EmptySource(_) | SyncError::Parse(_) | SyncError::Encoding(_)),
                ) => {
                    return Err(SyncError::SchemaInference(format!(
                        "{}: cannot sample {}: {}",
                        table_name,
                        fragment_name(path),
                        err
                    )));
                }
                Err(err) => return Err(err),
            }
        }
        self.infer_from_documents(table_name, &documents)
    }

    pub async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        schema_catalog::create_table(self.db.pool(), schema).await
    }

    /// Infer from files, persist the schema and create the data table.
    pub async fn infer_and_create(&self, table_name: &str, paths: &[PathBuf]) -> Result<TableSchema> {
        let inferred = self.infer_from_files(table_name, paths)?;
        self.create_table(&inferred.schema).await?;
        Ok(inferred.schema)
    }

    pub async fn schema(&self, table_name: &str) -> Result<Option<TableSchema>> {
        schema_catalog::load_schema(self.db.pool(), table_name).await
    }
}
