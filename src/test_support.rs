//! Fixtures shared by the unit tests.

use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use tempfile::TempDir;

use crate::app::SyncEngine;
use crate::application::{Exporter, Importer, MetadataMaintenance, RoundTripValidator};
use crate::domain::encoding_metadata::{EncodingMetadata, MetadataKey};
use crate::domain::schema::TableSchema;
use crate::domain::sync_config::SyncConfig;
use crate::infrastructure::db::schema_catalog;
use crate::infrastructure::db::table_rows::{self, StoredRow};
use crate::infrastructure::encoding::encode;

pub const SKILL_TABLE: &str = "skill_base_client";

/// Write `text` to `dir/name` in the given charset.
pub fn write_encoded(
    dir: &Path,
    name: &str,
    text: &str,
    encoding: &'static Encoding,
    bom: bool,
) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, encode(text, encoding, bom).unwrap()).unwrap();
    path
}

/// Skill table with `rows` rows, one attribute and mixed element types.
pub fn skill_document(rows: usize) -> String {
    let mut text = String::from("<skill_base_clients>\n");
    for i in 1..=rows {
        text.push_str(&format!(
            "\t<skill_base_client id=\"{i}\">\n\
             \t\t<name>skill_{i}</name>\n\
             \t\t<desc>火焰技能{i}</desc>\n\
             \t\t<cast_time>{i}.5</cast_time>\n\
             \t\t<target_flying_restriction>{}</target_flying_restriction>\n\
             \t\t<__order_index>{i}</__order_index>\n\
             \t</skill_base_client>\n",
            i % 2
        ));
    }
    text.push_str("</skill_base_clients>\n");
    text
}

/// In-memory engine with its own scratch directory.
pub struct TestEngine {
    engine: SyncEngine,
    dir: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(SyncConfig::default()).await
    }

    /// Engine over `config`, with the scratch directory moved into the temp dir.
    pub async fn with_config(config: SyncConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let config = SyncConfig {
            scratch_dir: Some(dir.path().join("scratch")),
            ..config
        };
        let engine = SyncEngine::in_memory(config).await.unwrap();
        Self { engine, dir }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn importer(&self) -> &Importer {
        self.engine.importer()
    }

    pub fn exporter(&self) -> &Exporter {
        self.engine.exporter()
    }

    pub fn validator(&self) -> &RoundTripValidator {
        self.engine.validator()
    }

    pub fn maintenance(&self) -> &MetadataMaintenance {
        self.engine.maintenance()
    }

    pub async fn infer(&self, samples: &[PathBuf]) -> TableSchema {
        self.infer_table(SKILL_TABLE, samples).await
    }

    pub async fn infer_table(&self, table: &str, samples: &[PathBuf]) -> TableSchema {
        self.engine
            .inferencer()
            .infer_and_create(table, samples)
            .await
            .unwrap()
    }

    /// Infer a schema from `sources`, then import them as the fragments of `table`.
    pub async fn import_new(&self, table: &str, sources: &[PathBuf]) {
        self.infer_table(table, sources).await;
        let request = crate::application::ImportRequest::fragments(table, sources.to_vec());
        let result = self
            .importer()
            .import(&request, &crate::domain::job::JobContext::new())
            .await
            .unwrap();
        assert!(result.row_errors.is_empty(), "{:?}", result.row_errors);
    }

    pub async fn try_metadata(&self, table: &str, partition: Option<&str>) -> Option<EncodingMetadata> {
        self.engine
            .metadata()
            .get(&MetadataKey::new(table, partition))
            .await
            .unwrap()
    }

    pub async fn metadata(&self, table: &str, partition: Option<&str>) -> EncodingMetadata {
        self.try_metadata(table, partition).await.unwrap()
    }

    pub async fn schema(&self, table: &str) -> TableSchema {
        schema_catalog::require_schema(self.engine.database().pool(), table)
            .await
            .unwrap()
    }

    pub async fn row_count(&self, table: &str, partition: &str) -> i64 {
        table_rows::count_rows(self.engine.database().pool(), table, partition)
            .await
            .unwrap()
    }

    pub async fn rows(&self, table: &str, partition: &str) -> Vec<StoredRow> {
        let schema = self.schema(table).await;
        table_rows::fetch_rows(self.engine.database().pool(), &schema, partition)
            .await
            .unwrap()
    }
}
