// ============================================================
// TABLE SCHEMA
// ============================================================
// Relational shape of one XML table, derived once by inference

use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal columns every data table carries in front of the inferred ones.
pub const ROW_ID_COLUMN: &str = "__row_id";
pub const PARTITION_COLUMN: &str = "__partition";
pub const FRAGMENT_COLUMN: &str = "__fragment";
pub const RESERVED_COLUMNS: [&str; 3] = [ROW_ID_COLUMN, PARTITION_COLUMN, FRAGMENT_COLUMN];

/// Path segment holding text written directly inside a row element.
pub const ROW_TEXT_SEGMENT: &str = "#text";

/// Prefix of the named CHECK constraint guarding a VARCHAR column's width.
pub const LENGTH_CONSTRAINT_PREFIX: &str = "maxlen:";

/// Whether a field was an attribute or the text of a leaf element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Attribute,
    Element,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Attribute => "attribute",
            FieldKind::Element => "element",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "attribute" => Some(FieldKind::Attribute),
            "element" => Some(FieldKind::Element),
            _ => None,
        }
    }
}

/// Location of a field relative to its row element.
///
/// Element segments may carry an occurrence suffix (`item[2]`) when a row
/// repeats a sibling name. For attributes the last segment is the attribute
/// name and the preceding ones locate the owning element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    pub segments: Vec<String>,
    pub kind: FieldKind,
}

impl FieldPath {
    pub fn element(segments: Vec<String>) -> Self {
        Self {
            segments,
            kind: FieldKind::Element,
        }
    }

    pub fn attribute(segments: Vec<String>) -> Self {
        Self {
            segments,
            kind: FieldKind::Attribute,
        }
    }

    /// Text content of the row element itself (`<row id="1">text</row>`).
    pub fn row_text() -> Self {
        Self::element(vec![ROW_TEXT_SEGMENT.to_string()])
    }

    pub fn is_row_text(&self) -> bool {
        self.kind == FieldKind::Element && self.segments.len() == 1 && self.segments[0] == ROW_TEXT_SEGMENT
    }

    /// Last element tag or attribute name, without any occurrence suffix.
    pub fn leaf_name(&self) -> &str {
        match self.kind {
            FieldKind::Attribute => self.segments.last().map(String::as_str).unwrap_or_default(),
            FieldKind::Element => self
                .segments
                .last()
                .map(|segment| Self::segment_tag(segment))
                .unwrap_or_default(),
        }
    }

    /// Name used by field rules and as the default column name.
    ///
    /// `a.b` for nested elements, `id` for row attributes, `a.b@x` for
    /// attributes of nested elements.
    pub fn field_name(&self) -> String {
        match self.kind {
            FieldKind::Element => self.segments.join("."),
            FieldKind::Attribute => match self.segments.split_last() {
                Some((attr, [])) => attr.clone(),
                Some((attr, owners)) => format!("{}@{}", owners.join("."), attr),
                None => String::new(),
            },
        }
    }

    /// Key that is unique per field within a row, used for hashing.
    pub fn canonical_key(&self) -> String {
        match self.kind {
            FieldKind::Element => self.segments.join("."),
            FieldKind::Attribute => match self.segments.split_last() {
                Some((attr, owners)) => format!("{}@{}", owners.join("."), attr),
                None => String::new(),
            },
        }
    }

    /// Element tag for a path segment, dropping any occurrence suffix.
    pub fn segment_tag(segment: &str) -> &str {
        match segment.find('[') {
            Some(idx) if segment.ends_with(']') => &segment[..idx],
            _ => segment,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Float,
    DateTime,
    Varchar,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::DateTime => "DATETIME",
            ColumnType::Varchar => "VARCHAR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "INTEGER" => Some(ColumnType::Integer),
            "FLOAT" => Some(ColumnType::Float),
            "DATETIME" => Some(ColumnType::DateTime),
            "VARCHAR" => Some(ColumnType::Varchar),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Textual layout a DATETIME column was observed in; rendering uses the same layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateTimeFormat {
    DashedDateTime,
    IsoDateTime,
    DashedDate,
    SlashedDateTime,
    SlashedDate,
}

impl DateTimeFormat {
    pub const ALL: [DateTimeFormat; 5] = [
        DateTimeFormat::DashedDateTime,
        DateTimeFormat::IsoDateTime,
        DateTimeFormat::DashedDate,
        DateTimeFormat::SlashedDateTime,
        DateTimeFormat::SlashedDate,
    ];

    pub fn pattern(&self) -> &'static str {
        match self {
            DateTimeFormat::DashedDateTime => "%Y-%m-%d %H:%M:%S",
            DateTimeFormat::IsoDateTime => "%Y-%m-%dT%H:%M:%S",
            DateTimeFormat::DashedDate => "%Y-%m-%d",
            DateTimeFormat::SlashedDateTime => "%Y/%m/%d %H:%M:%S",
            DateTimeFormat::SlashedDate => "%Y/%m/%d",
        }
    }

    pub fn has_time(&self) -> bool {
        !matches!(self, DateTimeFormat::DashedDate | DateTimeFormat::SlashedDate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DateTimeFormat::DashedDateTime => "dashed_date_time",
            DateTimeFormat::IsoDateTime => "iso_date_time",
            DateTimeFormat::DashedDate => "dashed_date",
            DateTimeFormat::SlashedDateTime => "slashed_date_time",
            DateTimeFormat::SlashedDate => "slashed_date",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub path: FieldPath,
    pub inferred_type: ColumnType,
    /// Declared width in characters; only set for VARCHAR columns.
    pub max_length: Option<u32>,
    pub nullable: bool,
    pub datetime_format: Option<DateTimeFormat>,
}

impl ColumnDef {
    /// SQL type as declared in the DDL.
    pub fn sql_type(&self) -> String {
        match (self.inferred_type, self.max_length) {
            (ColumnType::Varchar, Some(len)) => format!("VARCHAR({})", len),
            (ColumnType::Varchar, None) => "TEXT".to_string(),
            (other, _) => other.as_str().to_string(),
        }
    }

    pub fn length_constraint_name(&self) -> String {
        format!("{}{}", LENGTH_CONSTRAINT_PREFIX, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub root_tag: String,
    pub row_tag: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index_by_path(&self, path: &FieldPath) -> Option<usize> {
        self.columns.iter().position(|c| &c.path == path)
    }

    /// The only schema evolution allowed after creation.
    pub fn set_max_length(&mut self, column: &str, max_length: u32) -> bool {
        match self.columns.iter_mut().find(|c| c.name == column) {
            Some(col) if col.inferred_type == ColumnType::Varchar => {
                col.max_length = Some(max_length);
                true
            }
            _ => false,
        }
    }

    /// `CREATE TABLE` plus the partition index for this schema.
    pub fn ddl(&self) -> Vec<String> {
        self.ddl_for(&self.table_name)
    }

    /// DDL using a different physical table name, used when rebuilding.
    pub fn ddl_for(&self, physical_name: &str) -> Vec<String> {
        let mut lines = vec![
            format!("    {} INTEGER PRIMARY KEY", quote_ident(ROW_ID_COLUMN)),
            format!("    {} TEXT NOT NULL DEFAULT ''", quote_ident(PARTITION_COLUMN)),
            format!("    {} TEXT NOT NULL DEFAULT ''", quote_ident(FRAGMENT_COLUMN)),
        ];

        for col in &self.columns {
            let mut line = format!("    {} {}", quote_ident(&col.name), col.sql_type());
            if let (ColumnType::Varchar, Some(len)) = (col.inferred_type, col.max_length) {
                line.push_str(&format!(
                    " CONSTRAINT {} CHECK (length({}) <= {})",
                    quote_ident(&col.length_constraint_name()),
                    quote_ident(&col.name),
                    len
                ));
            }
            lines.push(line);
        }

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
                quote_ident(physical_name),
                lines.join(",\n")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {})",
                quote_ident(&format!("ix:{}:partition", self.table_name)),
                quote_ident(physical_name),
                quote_ident(PARTITION_COLUMN),
                quote_ident(ROW_ID_COLUMN)
            ),
        ]
    }
}

/// Double-quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Checks a user supplied table name before it is used in DDL.
pub fn validate_table_name(name: &str) -> std::result::Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("table name must not be empty".to_string());
    }
    if trimmed != name {
        return Err(format!("table name '{}' has surrounding whitespace", name));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(format!("table name '{}' contains control characters", name));
    }
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("sqlite_")
        || lower == "xml_table_schema"
        || lower == "xml_table_columns"
        || lower == "file_encoding_metadata"
    {
        return Err(format!("table name '{}' is reserved", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varchar(name: &str, len: u32) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            path: FieldPath::element(vec![name.to_string()]),
            inferred_type: ColumnType::Varchar,
            max_length: Some(len),
            nullable: false,
            datetime_format: None,
        }
    }

    #[test]
    fn test_field_names() {
        assert_eq!(FieldPath::attribute(vec!["id".into()]).field_name(), "id");
        assert_eq!(FieldPath::attribute(vec!["id".into()]).canonical_key(), "@id");
        assert_eq!(
            FieldPath::attribute(vec!["stats".into(), "hp".into()]).field_name(),
            "stats@hp"
        );
        assert_eq!(
            FieldPath::element(vec!["stats".into(), "item[2]".into()]).field_name(),
            "stats.item[2]"
        );
        assert_eq!(FieldPath::segment_tag("item[2]"), "item");
        assert_eq!(FieldPath::segment_tag("item"), "item");
    }

    #[test]
    fn test_leaf_names_and_row_text() {
        assert_eq!(
            FieldPath::element(vec!["effects".into(), "__order_index[2]".into()]).leaf_name(),
            "__order_index"
        );
        assert_eq!(
            FieldPath::attribute(vec!["effect".into(), "__order_index".into()]).leaf_name(),
            "__order_index"
        );
        assert!(FieldPath::row_text().is_row_text());
        assert_eq!(FieldPath::row_text().field_name(), "#text");
        assert!(!FieldPath::element(vec!["a".into(), ROW_TEXT_SEGMENT.into()]).is_row_text());
    }

    #[test]
    fn test_ddl_contains_length_constraint() {
        let schema = TableSchema {
            table_name: "skill".into(),
            root_tag: "skills".into(),
            row_tag: "skill".into(),
            columns: vec![varchar("name", 24)],
        };
        let ddl = schema.ddl();
        assert!(ddl[0].contains("\"name\" VARCHAR(24) CONSTRAINT \"maxlen:name\" CHECK (length(\"name\") <= 24)"));
        assert!(ddl[0].contains("\"__row_id\" INTEGER PRIMARY KEY"));
        assert!(ddl[1].starts_with("CREATE INDEX IF NOT EXISTS"));
    }

    #[test]
    fn test_set_max_length_only_for_varchar() {
        let mut schema = TableSchema {
            table_name: "skill".into(),
            root_tag: "skills".into(),
            row_tag: "skill".into(),
            columns: vec![varchar("name", 24)],
        };
        assert!(schema.set_max_length("name", 48));
        assert_eq!(schema.column("name").and_then(|c| c.max_length), Some(48));
        assert!(!schema.set_max_length("missing", 48));
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("skill_base").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("sqlite_master").is_err());
        assert!(validate_table_name("file_encoding_metadata").is_err());
    }
}
