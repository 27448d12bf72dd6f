// ============================================================
// FIELD COMPATIBILITY RULES
// ============================================================
// Versioned blacklist/correction data mined from server error logs

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::schema::FieldPath;

/// Scope tag matching every structural context.
pub const ANY_SCOPE: &str = "*";

/// Serialized form of a ruleset, as stored in the rule file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFile {
    pub version: String,
    #[serde(default)]
    pub blacklist: Vec<BlacklistRule>,
    #[serde(default)]
    pub corrections: Vec<CorrectionRuleEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistRule {
    pub field: String,
    #[serde(default = "any_scope")]
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuePredicate {
    Equals(String),
    OneOf(Vec<String>),
    /// Regular expression matched against the whole trimmed value.
    Matches(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRuleEntry {
    pub field: String,
    #[serde(default = "any_scope")]
    pub scope: String,
    pub when: ValuePredicate,
    pub replacement: String,
}

fn any_scope() -> String {
    ANY_SCOPE.to_string()
}

/// Correction with its predicate compiled.
#[derive(Debug, Clone)]
pub struct CorrectionRule {
    pub field: String,
    pub scope: String,
    pub when: ValuePredicate,
    pub replacement: String,
    pattern: Option<Regex>,
}

impl CorrectionRule {
    pub fn compile(entry: CorrectionRuleEntry) -> Result<Self, String> {
        let pattern = match &entry.when {
            ValuePredicate::Matches(expr) => Some(
                Regex::new(&format!("^(?:{})$", expr))
                    .map_err(|e| format!("invalid pattern for {}: {}", entry.field, e))?,
            ),
            _ => None,
        };
        Ok(Self {
            field: entry.field,
            scope: entry.scope,
            when: entry.when,
            replacement: entry.replacement,
            pattern,
        })
    }

    pub fn matches_value(&self, value: &str) -> bool {
        match (&self.when, &self.pattern) {
            (ValuePredicate::Equals(expected), _) => value == expected,
            (ValuePredicate::OneOf(options), _) => options.iter().any(|o| o == value),
            (ValuePredicate::Matches(_), Some(re)) => re.is_match(value),
            (ValuePredicate::Matches(_), None) => false,
        }
    }

    pub fn applies_to(&self, field_name: &str, scope_tag: &str) -> bool {
        self.field == field_name && scope_matches(&self.scope, scope_tag)
    }
}

pub fn scope_matches(rule_scope: &str, scope_tag: &str) -> bool {
    rule_scope == ANY_SCOPE || rule_scope == scope_tag
}

fn scopes_overlap(a: &str, b: &str) -> bool {
    a == ANY_SCOPE || b == ANY_SCOPE || a == b
}

/// Outcome of evaluating one field of one exported row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldDecision {
    Drop,
    Rewrite(String),
    Keep,
}

/// Immutable, validated ruleset.
#[derive(Debug, Clone)]
pub struct FieldRuleSet {
    pub version: String,
    pub blacklist: Vec<BlacklistRule>,
    pub corrections: Vec<CorrectionRule>,
}

impl FieldRuleSet {
    pub fn empty() -> Self {
        Self {
            version: "empty".to_string(),
            blacklist: Vec::new(),
            corrections: Vec::new(),
        }
    }

    /// Compiles a rule file, rejecting corrections that would not be idempotent.
    pub fn from_rule_file(file: RuleFile) -> Result<Self, String> {
        let corrections = file
            .corrections
            .into_iter()
            .map(CorrectionRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        // A replacement must never re-trigger any correction on the same field.
        for rule in &corrections {
            for other in &corrections {
                if rule.field == other.field
                    && scopes_overlap(&rule.scope, &other.scope)
                    && other.matches_value(rule.replacement.trim())
                {
                    return Err(format!(
                        "correction for '{}' (scope {}) is not idempotent: replacement '{}' matches a correction predicate",
                        rule.field, rule.scope, rule.replacement
                    ));
                }
            }
        }

        for rule in &file.blacklist {
            if rule.field.trim().is_empty() {
                return Err("blacklist rule with empty field name".to_string());
            }
        }

        Ok(Self {
            version: file.version,
            blacklist: file.blacklist,
            corrections,
        })
    }

    pub fn is_blacklisted(&self, field_name: &str, scope_tag: &str) -> bool {
        self.blacklist
            .iter()
            .any(|rule| rule.field == field_name && scope_matches(&rule.scope, scope_tag))
    }

    /// Pure per-field decision: blacklist first, then the first matching correction.
    pub fn evaluate(&self, field_name: &str, scope_tag: &str, raw_value: &str) -> FieldDecision {
        if self.is_blacklisted(field_name, scope_tag) {
            return FieldDecision::Drop;
        }
        let candidate = raw_value.trim();
        self.corrections
            .iter()
            .find(|rule| rule.applies_to(field_name, scope_tag) && rule.matches_value(candidate))
            .map(|rule| FieldDecision::Rewrite(rule.replacement.clone()))
            .unwrap_or(FieldDecision::Keep)
    }

    /// Rules name a field either by its full name (`effects.effect@type`) or
    /// by its leaf (`type`); the full name is tried first.
    pub fn evaluate_path(&self, path: &FieldPath, scope_tag: &str, raw_value: &str) -> FieldDecision {
        let full_name = path.field_name();
        match self.evaluate(&full_name, scope_tag, raw_value) {
            FieldDecision::Keep if path.leaf_name() != full_name => {
                self.evaluate(path.leaf_name(), scope_tag, raw_value)
            }
            decision => decision,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.blacklist.len() + self.corrections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correction(field: &str, scope: &str, when: ValuePredicate, replacement: &str) -> CorrectionRuleEntry {
        CorrectionRuleEntry {
            field: field.to_string(),
            scope: scope.to_string(),
            when,
            replacement: replacement.to_string(),
        }
    }

    fn ruleset() -> FieldRuleSet {
        FieldRuleSet::from_rule_file(RuleFile {
            version: "test".into(),
            blacklist: vec![
                BlacklistRule {
                    field: "__order_index".into(),
                    scope: ANY_SCOPE.into(),
                },
                BlacklistRule {
                    field: "desc_long".into(),
                    scope: "skill_base_client".into(),
                },
            ],
            corrections: vec![
                correction(
                    "target_flying_restriction",
                    "skill_base_client",
                    ValuePredicate::Equals("0".into()),
                    "1",
                ),
                correction(
                    "cast_speed",
                    ANY_SCOPE,
                    ValuePredicate::Matches("-[0-9]+".into()),
                    "0",
                ),
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_blacklist_is_scoped() {
        let rules = ruleset();
        assert_eq!(rules.evaluate("desc_long", "skill_base_client", "x"), FieldDecision::Drop);
        assert_eq!(rules.evaluate("desc_long", "item_template", "x"), FieldDecision::Keep);
        assert_eq!(rules.evaluate("__order_index", "anything", "3"), FieldDecision::Drop);
    }

    #[test]
    fn test_correction_matches_value_not_presence() {
        let rules = ruleset();
        assert_eq!(
            rules.evaluate("target_flying_restriction", "skill_base_client", "0"),
            FieldDecision::Rewrite("1".into())
        );
        assert_eq!(
            rules.evaluate("target_flying_restriction", "skill_base_client", "2"),
            FieldDecision::Keep
        );
        assert_eq!(
            rules.evaluate("cast_speed", "npc", " -15 "),
            FieldDecision::Rewrite("0".into())
        );
    }

    #[test]
    fn test_corrections_are_idempotent() {
        let rules = ruleset();
        let once = match rules.evaluate("cast_speed", "npc", "-3") {
            FieldDecision::Rewrite(v) => v,
            other => panic!("unexpected decision {:?}", other),
        };
        assert_eq!(rules.evaluate("cast_speed", "npc", &once), FieldDecision::Keep);
    }

    #[test]
    fn test_non_idempotent_rules_are_rejected() {
        let result = FieldRuleSet::from_rule_file(RuleFile {
            version: "bad".into(),
            blacklist: vec![],
            corrections: vec![
                correction("level", ANY_SCOPE, ValuePredicate::Equals("0".into()), "1"),
                correction("level", "npc", ValuePredicate::OneOf(vec!["1".into()]), "2"),
            ],
        });
        assert!(result.is_err());

        let self_matching = FieldRuleSet::from_rule_file(RuleFile {
            version: "bad".into(),
            blacklist: vec![],
            corrections: vec![correction(
                "level",
                ANY_SCOPE,
                ValuePredicate::Matches("[0-9]+".into()),
                "5",
            )],
        });
        assert!(self_matching.is_err());
    }
}
