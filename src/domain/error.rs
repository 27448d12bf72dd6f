use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncError {
    /// No repeating row element could be identified in the input.
    SchemaInference(String),
    /// The target table has no recorded schema/DDL yet.
    SchemaNotFound(String),
    /// A value exceeded the declared width of a VARCHAR column.
    ColumnOverflow {
        table: String,
        column: String,
        declared: u32,
    },
    /// The source file is missing or zero bytes long.
    EmptySource(String),
    /// The export finished but its output is missing or empty.
    ExportIntegrity(String),
    Encoding(String),
    Parse(String),
    /// A value cannot be represented by its column's inferred type.
    ValueType(String),
    NotFound(String),
    Validation(String),
    Config(String),
    Database(String),
    Io(String),
    Internal(String),
    Cancelled,
}

impl SyncError {
    /// Errors a caller can remediate with exactly one corrective step and a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::SchemaNotFound(_) | SyncError::ColumnOverflow { .. }
        )
    }

    /// Errors that invalidate a whole job rather than a single file or row.
    pub fn is_resource_failure(&self) -> bool {
        matches!(self, SyncError::Database(_))
    }

    /// Short machine-friendly name used in batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::SchemaInference(_) => "SchemaInferenceError",
            SyncError::SchemaNotFound(_) => "SchemaNotFoundError",
            SyncError::ColumnOverflow { .. } => "ColumnOverflowError",
            SyncError::EmptySource(_) => "EmptySourceError",
            SyncError::ExportIntegrity(_) => "ExportIntegrityError",
            SyncError::Encoding(_) => "EncodingError",
            SyncError::Parse(_) => "ParseError",
            SyncError::ValueType(_) => "ValueTypeError",
            SyncError::NotFound(_) => "NotFound",
            SyncError::Validation(_) => "ValidationError",
            SyncError::Config(_) => "ConfigError",
            SyncError::Database(_) => "DatabaseError",
            SyncError::Io(_) => "IoError",
            SyncError::Internal(_) => "Internal",
            SyncError::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::SchemaInference(msg) => write!(f, "Schema inference error: {}", msg),
            SyncError::SchemaNotFound(table) => write!(f, "Schema not found for table: {}", table),
            SyncError::ColumnOverflow {
                table,
                column,
                declared,
            } => write!(
                f,
                "Column overflow: {}.{} exceeds declared length {}",
                table, column, declared
            ),
            SyncError::EmptySource(path) => write!(f, "Empty source: {}", path),
            SyncError::ExportIntegrity(msg) => write!(f, "Export integrity error: {}", msg),
            SyncError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            SyncError::Parse(msg) => write!(f, "Parse error: {}", msg),
            SyncError::ValueType(msg) => write!(f, "Value type error: {}", msg),
            SyncError::NotFound(msg) => write!(f, "Not found: {}", msg),
            SyncError::Validation(msg) => write!(f, "Validation error: {}", msg),
            SyncError::Config(msg) => write!(f, "Config error: {}", msg),
            SyncError::Database(msg) => write!(f, "Database error: {}", msg),
            SyncError::Io(msg) => write!(f, "IO error: {}", msg),
            SyncError::Internal(msg) => write!(f, "Internal error: {}", msg),
            SyncError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
