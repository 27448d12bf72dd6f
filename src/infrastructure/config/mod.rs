// ============================================================
// CONFIG LOADER
// ============================================================
// Defaults, then an optional TOML file, then XMLDB_SYNC_* env vars

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;

use crate::domain::error::{Result, SyncError};
use crate::domain::sync_config::SyncConfig;

pub const ENV_PREFIX: &str = "XMLDB_SYNC_";

pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    // A missing .env is normal outside development.
    let _ = dotenvy::dotenv();
    extract(figment(path))
}

fn figment(path: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(SyncConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX))
}

fn extract(figment: Figment) -> Result<SyncConfig> {
    let config: SyncConfig = figment
        .extract()
        .map_err(|e| SyncError::Config(format!("Failed to load configuration: {e}")))?;
    config.validate().map_err(SyncError::Config)?;
    Ok(config)
}
