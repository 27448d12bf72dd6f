use std::path::Path;
use std::sync::Arc;

use encoding_rs::Encoding;
use tracing::info;

use crate::application::{
    BatchRunner, ContentHasher, Exporter, FieldFilter, ImportOptions, Importer, InferenceOptions,
    MetadataMaintenance, RoundTripValidator, SchemaInferencer,
};
use crate::domain::error::{Result, SyncError};
use crate::domain::sync_config::SyncConfig;
use crate::infrastructure::config::load_config;
use crate::infrastructure::db::{Database, EncodingMetadataStore};
use crate::infrastructure::encoding::encoding_for_name;
use crate::infrastructure::rules::resolve_rules;
use crate::interfaces::jobs::JobRunner;

/// Install the global fmt subscriber; a second call is a no-op.
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Every service wired against one database and one rule set.
#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    db: Database,
    metadata: EncodingMetadataStore,
    inferencer: SchemaInferencer,
    importer: Importer,
    exporter: Exporter,
    validator: RoundTripValidator,
    maintenance: MetadataMaintenance,
    batch: BatchRunner,
}

impl SyncEngine {
    /// Load configuration from defaults, `config_file` and the environment, then connect.
    pub async fn from_env(config_file: Option<&Path>) -> Result<Self> {
        let config = load_config(config_file)?;
        init_tracing(&config.log_filter);
        Self::connect(config).await
    }

    pub async fn connect(config: SyncConfig) -> Result<Self> {
        config.validate().map_err(SyncError::Config)?;
        let db = Database::connect(&config.database_url, config.max_connections).await?;
        Self::build(config, db)
    }

    /// Engine over a private in-memory database.
    pub async fn in_memory(config: SyncConfig) -> Result<Self> {
        config.validate().map_err(SyncError::Config)?;
        let db = Database::in_memory().await?;
        Self::build(config, db)
    }

    fn build(config: SyncConfig, db: Database) -> Result<Self> {
        let legacy = legacy_encoding(&config)?;
        let rules = Arc::new(resolve_rules(config.rules_path.as_deref())?);
        let filter = FieldFilter::new(rules);
        let hasher = ContentHasher::new(filter.clone());
        let metadata = EncodingMetadataStore::new(db.pool().clone());

        let inferencer =
            SchemaInferencer::new(db.clone(), InferenceOptions::from_config(&config), legacy);
        let importer = Importer::new(
            db.clone(),
            metadata.clone(),
            hasher.clone(),
            ImportOptions {
                batch_size: config.batch_size,
                max_widenings_per_file: config.max_widenings_per_file,
                legacy_encoding: legacy,
            },
        );
        let exporter = Exporter::new(db.clone(), metadata.clone(), filter);
        let validator = RoundTripValidator::new(
            metadata.clone(),
            exporter.clone(),
            hasher.clone(),
            config.scratch_root(),
            legacy,
        );
        let maintenance = MetadataMaintenance::new(db.clone(), metadata.clone(), hasher, legacy);
        let batch = BatchRunner::new(importer.clone(), exporter.clone(), inferencer.clone());

        info!(
            legacy_encoding = legacy.name(),
            batch_size = config.batch_size,
            "Sync engine ready"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            metadata,
            inferencer,
            importer,
            exporter,
            validator,
            maintenance,
            batch,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn metadata(&self) -> &EncodingMetadataStore {
        &self.metadata
    }

    pub fn inferencer(&self) -> &SchemaInferencer {
        &self.inferencer
    }

    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    pub fn validator(&self) -> &RoundTripValidator {
        &self.validator
    }

    pub fn maintenance(&self) -> &MetadataMaintenance {
        &self.maintenance
    }

    pub fn batch(&self) -> &BatchRunner {
        &self.batch
    }

    pub fn jobs(&self) -> JobRunner {
        JobRunner::new(self.batch.clone(), self.validator.clone())
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

fn legacy_encoding(config: &SyncConfig) -> Result<&'static Encoding> {
    encoding_for_name(&config.legacy_encoding)
        .or_else(|| Encoding::for_label(config.legacy_encoding.as_bytes()))
        .ok_or_else(|| {
            SyncError::Config(format!(
                "legacy_encoding '{}' is not a known encoding label",
                config.legacy_encoding
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = SyncConfig {
            max_connections: 0,
            ..Default::default()
        };
        let err = SyncEngine::in_memory(config).await.err().unwrap();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_rules_file_is_config_error() {
        let config = SyncConfig {
            rules_path: Some("/definitely/not/here.json".into()),
            ..Default::default()
        };
        assert!(SyncEngine::in_memory(config).await.is_err());
    }

    #[test]
    fn test_legacy_encoding_labels() {
        let config = SyncConfig {
            legacy_encoding: "big5".into(),
            ..Default::default()
        };
        assert_eq!(legacy_encoding(&config).unwrap(), encoding_rs::BIG5);
    }
}
