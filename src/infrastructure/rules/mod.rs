// ============================================================
// FIELD RULE LOADING
// ============================================================
// Embedded default ruleset, optionally replaced by an external file

use std::path::Path;

use crate::domain::error::{Result, SyncError};
use crate::domain::field_rules::{FieldRuleSet, RuleFile};

const DEFAULT_RULES: &str = include_str!("../../../resources/field_rules.json");

pub fn parse_rules(json: &str) -> Result<FieldRuleSet> {
    let file: RuleFile = serde_json::from_str(json)
        .map_err(|e| SyncError::Config(format!("Invalid field rule file: {e}")))?;
    FieldRuleSet::from_rule_file(file).map_err(SyncError::Config)
}

pub fn default_rules() -> Result<FieldRuleSet> {
    parse_rules(DEFAULT_RULES)
}

pub fn load_rules(path: &Path) -> Result<FieldRuleSet> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        SyncError::Config(format!("Failed to read rule file {}: {e}", path.display()))
    })?;
    parse_rules(&json)
}

/// The configured ruleset, or the embedded one when no path is given.
pub fn resolve_rules(path: Option<&Path>) -> Result<FieldRuleSet> {
    let rules = match path {
        Some(path) => load_rules(path)?,
        None => default_rules()?,
    };
    tracing::info!(
        version = %rules.version,
        rules = rules.rule_count(),
        "Loaded field compatibility rules"
    );
    Ok(rules)
}
