// ============================================================
// FIELD COMPATIBILITY FILTER
// ============================================================
// Export-time blacklist and value corrections for server compatibility

use std::sync::Arc;

use crate::domain::field_rules::{FieldDecision, FieldRuleSet};
use crate::infrastructure::xml::XmlRow;

/// Counts of what the filter changed during one export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub dropped: usize,
    pub rewritten: usize,
}

#[derive(Debug, Clone)]
pub struct FieldFilter {
    rules: Arc<FieldRuleSet>,
}

impl FieldFilter {
    pub fn new(rules: Arc<FieldRuleSet>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &FieldRuleSet {
        &self.rules
    }

    pub fn evaluate(&self, field_name: &str, scope_tag: &str, raw_value: &str) -> FieldDecision {
        self.rules.evaluate(field_name, scope_tag, raw_value)
    }

    /// Apply the ruleset to every field of a row element tagged `scope_tag`.
    pub fn filter_row(&self, scope_tag: &str, mut row: XmlRow, stats: &mut FilterStats) -> XmlRow {
        row.fields.retain_mut(|field| {
            match self.rules.evaluate_path(&field.path, scope_tag, &field.value) {
                FieldDecision::Drop => {
                    stats.dropped += 1;
                    false
                }
                FieldDecision::Rewrite(value) => {
                    if value != field.value {
                        stats.rewritten += 1;
                        field.value = value;
                    }
                    true
                }
                FieldDecision::Keep => true,
            }
        });
        row
    }
}
