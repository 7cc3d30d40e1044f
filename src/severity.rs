// SPDX-License-Identifier: EUPL-1.2

//! Severity classification.
//!
//! Policy lives in an ordered [`SeverityTable`]: rules are tried top-down and
//! the first matching rule wins. A rule matches when any one of its clauses
//! holds; a clause holds when all of its conditions do.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::models::Severity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub requires_watermark: bool,
    #[serde(default)]
    pub requires_metadata: bool,
}

impl Clause {
    fn score(min: f64) -> Self {
        Self {
            min_score: Some(min),
            requires_watermark: false,
            requires_metadata: false,
        }
    }

    fn watermark_and_score(min: f64) -> Self {
        Self {
            min_score: Some(min),
            requires_watermark: true,
            requires_metadata: false,
        }
    }

    fn metadata() -> Self {
        Self {
            min_score: None,
            requires_watermark: false,
            requires_metadata: true,
        }
    }

    fn holds(&self, score: f64, watermark_found: bool, metadata_match: bool) -> bool {
        self.min_score.map_or(true, |min| score >= min)
            && (!self.requires_watermark || watermark_found)
            && (!self.requires_metadata || metadata_match)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityRule {
    pub severity: Severity,
    pub any_of: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityTable {
    pub rules: Vec<SeverityRule>,
    #[serde(default = "default_fallback")]
    pub fallback: Severity,
}

fn default_fallback() -> Severity {
    Severity::Low
}

impl Default for SeverityTable {
    fn default() -> Self {
        Self {
            rules: vec![
                SeverityRule {
                    severity: Severity::Critical,
                    any_of: vec![Clause::watermark_and_score(90.0)],
                },
                SeverityRule {
                    severity: Severity::High,
                    any_of: vec![Clause::score(80.0), Clause::watermark_and_score(70.0)],
                },
                SeverityRule {
                    severity: Severity::Medium,
                    any_of: vec![Clause::score(60.0), Clause::metadata()],
                },
            ],
            fallback: Severity::Low,
        }
    }
}

impl SeverityTable {
    /// Load a table from its JSON form, e.g. the `SEVERITY_RULES` setting.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let table: SeverityTable =
            serde_json::from_str(raw).context("severity table is not valid JSON")?;
        for rule in &table.rules {
            if rule.any_of.is_empty() {
                bail!("rule for {} has no clauses", rule.severity);
            }
            for clause in &rule.any_of {
                if let Some(min) = clause.min_score {
                    if !(0.0..=100.0).contains(&min) {
                        bail!("min_score {min} for {} is outside 0..=100", rule.severity);
                    }
                }
            }
        }
        Ok(table)
    }

    /// Pure and deterministic: identical inputs always yield the same severity.
    pub fn classify(&self, score: f64, watermark_found: bool, metadata_match: bool) -> Severity {
        self.rules
            .iter()
            .find(|rule| {
                rule.any_of
                    .iter()
                    .any(|c| c.holds(score, watermark_found, metadata_match))
            })
            .map_or(self.fallback, |rule| rule.severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_examples() {
        let t = SeverityTable::default();
        assert_eq!(t.classify(95.0, true, false), Severity::Critical);
        assert_eq!(t.classify(85.0, false, false), Severity::High);
        assert_eq!(t.classify(65.0, false, true), Severity::Medium);
        assert_eq!(t.classify(10.0, false, false), Severity::Low);
    }

    #[test]
    fn boundaries_and_order() {
        let t = SeverityTable::default();
        assert_eq!(t.classify(90.0, true, false), Severity::Critical);
        assert_eq!(t.classify(89.99, true, false), Severity::High);
        assert_eq!(t.classify(70.0, true, false), Severity::High);
        assert_eq!(t.classify(69.0, true, false), Severity::Medium);
        assert_eq!(t.classify(95.0, false, true), Severity::High);
        assert_eq!(t.classify(5.0, false, true), Severity::Medium);
        assert_eq!(t.classify(59.99, false, false), Severity::Low);
    }

    #[test]
    fn classification_is_deterministic() {
        let t = SeverityTable::default();
        let first = t.classify(77.5, true, true);
        for _ in 0..100 {
            assert_eq!(t.classify(77.5, true, true), first);
        }
    }

    #[test]
    fn table_loads_from_json() {
        let t = SeverityTable::from_json(
            r#"{"rules":[{"severity":"HIGH","any_of":[{"min_score":50}]}],"fallback":"MEDIUM"}"#,
        )
        .unwrap();
        assert_eq!(t.classify(50.0, false, false), Severity::High);
        assert_eq!(t.classify(49.0, false, false), Severity::Medium);

        let default_json = serde_json::to_string(&SeverityTable::default()).unwrap();
        assert_eq!(SeverityTable::from_json(&default_json).unwrap(), SeverityTable::default());
    }

    #[test]
    fn invalid_tables_are_rejected() {
        assert!(SeverityTable::from_json("not json").is_err());
        assert!(SeverityTable::from_json(r#"{"rules":[{"severity":"LOW","any_of":[]}]}"#).is_err());
        assert!(SeverityTable::from_json(
            r#"{"rules":[{"severity":"LOW","any_of":[{"min_score":120}]}]}"#
        )
        .is_err());
    }
}
