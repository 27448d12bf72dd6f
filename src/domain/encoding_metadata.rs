use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state outcome of the last round-trip validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pass,
    Fail,
    NotValidated,
}

impl ValidationStatus {
    /// Column value; `None` is stored as SQL NULL.
    pub fn as_db(&self) -> Option<&'static str> {
        match self {
            ValidationStatus::Pass => Some("PASS"),
            ValidationStatus::Fail => Some("FAIL"),
            ValidationStatus::NotValidated => None,
        }
    }

    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("PASS") => ValidationStatus::Pass,
            Some("FAIL") => ValidationStatus::Fail,
            _ => ValidationStatus::NotValidated,
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Pass => write!(f, "PASS"),
            ValidationStatus::Fail => write!(f, "FAIL"),
            ValidationStatus::NotValidated => write!(f, "NOT_VALIDATED"),
        }
    }
}

/// Identity of one importable/exportable unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetadataKey {
    pub table_name: String,
    /// Partition key, empty when the table is not partitioned.
    pub partition: String,
}

impl MetadataKey {
    pub fn new(table_name: impl Into<String>, partition: Option<&str>) -> Self {
        Self {
            table_name: table_name.into(),
            partition: partition.unwrap_or_default().to_string(),
        }
    }

    pub fn partition_opt(&self) -> Option<&str> {
        if self.partition.is_empty() {
            None
        } else {
            Some(&self.partition)
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.partition.is_empty() {
            write!(f, "{}", self.table_name)
        } else {
            write!(f, "{}[{}]", self.table_name, self.partition)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingMetadata {
    pub key: MetadataKey,
    pub original_encoding: String,
    pub has_bom: bool,
    pub original_content_hash: Option<String>,
    pub original_file_path: Option<String>,
    pub last_validation_result: ValidationStatus,
    pub import_count: i64,
    pub export_count: i64,
    pub last_import_time: Option<DateTime<Utc>>,
}

/// Facts recorded by a successful import.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub encoding: String,
    pub has_bom: bool,
    pub content_hash: String,
    pub source_path: Option<String>,
    pub imported_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_status_db_mapping() {
        assert_eq!(ValidationStatus::Pass.as_db(), Some("PASS"));
        assert_eq!(ValidationStatus::NotValidated.as_db(), None);
        assert_eq!(ValidationStatus::from_db(Some("FAIL")), ValidationStatus::Fail);
        assert_eq!(ValidationStatus::from_db(None), ValidationStatus::NotValidated);
    }

    #[test]
    fn test_metadata_key_display() {
        assert_eq!(MetadataKey::new("skill", None).to_string(), "skill");
        assert_eq!(MetadataKey::new("npc", Some("210010000")).to_string(), "npc[210010000]");
        assert_eq!(MetadataKey::new("npc", Some("")).partition_opt(), None);
    }
}
