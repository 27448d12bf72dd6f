// ============================================================
// SYNC CONFIGURATION
// ============================================================
// Tunables for inference, import batching and encoding fallback

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite connection string (default: sqlite://xmldb-sync.db)
    pub database_url: String,

    /// Connection pool size (default: 4)
    pub max_connections: u32,

    /// Rows per import transaction (default: 500)
    pub batch_size: usize,

    /// Rows sampled by the schema inferencer, 0 samples everything (default: 10000)
    pub sample_rows: usize,

    /// Smallest declared VARCHAR width (default: 16)
    pub varchar_min_length: u32,

    /// Headroom added over the longest observed value, in percent (default: 50)
    pub varchar_headroom_percent: u32,

    /// Upper bound on overflow widenings within one import (default: 32)
    pub max_widenings_per_file: usize,

    /// Encoding assumed for BOM-less, undeclared, non-UTF-8 files (default: GBK)
    pub legacy_encoding: String,

    /// Directory for validator scratch exports (default: system temp dir)
    pub scratch_dir: Option<PathBuf>,

    /// External field rule file; the embedded ruleset is used when unset
    pub rules_path: Option<PathBuf>,

    /// tracing-subscriber filter directive (default: info)
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://xmldb-sync.db".to_string(),
            max_connections: 4,
            batch_size: 500,
            sample_rows: 10_000,
            varchar_min_length: 16,
            varchar_headroom_percent: 50,
            max_widenings_per_file: 32,
            legacy_encoding: "GBK".to_string(),
            scratch_dir: None,
            rules_path: None,
            log_filter: "info".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("xmldb-sync-scratch"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.trim().is_empty() {
            return Err("database_url must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.varchar_min_length == 0 {
            return Err("varchar_min_length must be > 0".to_string());
        }
        if encoding_rs::Encoding::for_label(self.legacy_encoding.as_bytes()).is_none() {
            return Err(format!(
                "legacy_encoding '{}' is not a known encoding label",
                self.legacy_encoding
            ));
        }
        Ok(())
    }
}
