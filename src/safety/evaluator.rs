//! Pairwise compatibility evaluation for a composition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dataset::{BENEFICIAL_TYPES, DatasetStatistics, InteractionDataset, InteractionRecord};

const RECOMMENDATION: &str = "建议重新审查方剂配伍，或在中医师指导下使用";
const UNVERIFIED_WARNING: &str = "⚠️ 无法完成配伍安全校验，请谨慎使用";

/// One detected conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyDetail {
    pub level: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub substance_a: String,
    pub substance_b: String,
    pub description: String,
    pub recommendation: String,
}

/// Result of evaluating a whole composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub warnings: Vec<String>,
    pub details: Vec<SafetyDetail>,
    pub checked_at: DateTime<Utc>,
    /// `false` when the interaction table could not be loaded, so an empty
    /// warning list means "nothing checked" rather than "nothing found".
    pub dataset_available: bool,
}

impl SafetyVerdict {
    /// Verdict used when evaluation itself failed. Never reports safe.
    #[must_use]
    pub fn unverified() -> Self {
        Self {
            is_safe: false,
            warnings: vec![UNVERIFIED_WARNING.to_string()],
            details: Vec::new(),
            checked_at: Utc::now(),
            dataset_available: false,
        }
    }
}

/// A beneficial pairing for a substance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeneficialPairing {
    #[serde(rename = "type")]
    pub kind: String,
    pub partner: String,
    pub effect: Option<String>,
    pub description: String,
}

/// Anything with a display name can be evaluated.
pub trait NamedSubstance {
    fn substance_name(&self) -> &str;
}

impl NamedSubstance for str {
    fn substance_name(&self) -> &str {
        self
    }
}

impl NamedSubstance for String {
    fn substance_name(&self) -> &str {
        self
    }
}

impl<T: NamedSubstance + ?Sized> NamedSubstance for &T {
    fn substance_name(&self) -> &str {
        (**self).substance_name()
    }
}

/// Stateless evaluator over a shared, read-only dataset.
///
/// Cloning is cheap and the evaluator can be used from any thread.
#[derive(Debug, Clone)]
pub struct SafetyEvaluator {
    dataset: Arc<InteractionDataset>,
}

impl SafetyEvaluator {
    pub fn new(dataset: Arc<InteractionDataset>) -> Self {
        Self { dataset }
    }

    pub fn dataset(&self) -> &InteractionDataset {
        &self.dataset
    }

    /// Check every unordered pair `(i, j)`, `i < j`, of the composition.
    ///
    /// Each distinct interaction record that applies to a pair produces one
    /// warning and one detail.
    pub fn check<'a, I, T>(&self, items: I) -> SafetyVerdict
    where
        I: IntoIterator<Item = &'a T>,
        T: NamedSubstance + ?Sized + 'a,
    {
        let names: Vec<&str> = items
            .into_iter()
            .map(|i| i.substance_name().trim())
            .collect();
        let mut warnings = Vec::new();
        let mut details = Vec::new();

        for (i, first) in names.iter().enumerate() {
            let keys = self.dataset.keys_for(first);
            if keys.is_empty() {
                continue;
            }
            for second in &names[i + 1..] {
                for rec in self.conflicts_between(&keys, second) {
                    warnings.push(format!("⚠️ {}: {first} 与 {second} 配伍禁忌！", rec.kind));
                    details.push(SafetyDetail {
                        level: level_for(rec.severity.as_deref()).to_string(),
                        kind: rec.kind.clone(),
                        substance_a: (*first).to_string(),
                        substance_b: (*second).to_string(),
                        description: rec.description.clone(),
                        recommendation: RECOMMENDATION.to_string(),
                    });
                }
            }
        }

        if !warnings.is_empty() {
            debug!(count = warnings.len(), substances = ?names, "Incompatibilities detected");
        }

        SafetyVerdict {
            is_safe: warnings.is_empty(),
            warnings,
            details,
            checked_at: Utc::now(),
            dataset_available: self.dataset.is_available(),
        }
    }

    fn conflicts_between(&self, keys: &[&str], other: &str) -> Vec<&InteractionRecord> {
        let matcher = self.dataset.matcher();
        let mut seen: Vec<usize> = Vec::new();
        for key in keys {
            for adj in self.dataset.neighbours(key) {
                if !seen.contains(&adj.record) && matcher.matches(adj.partner, other) {
                    seen.push(adj.record);
                }
            }
        }
        seen.into_iter()
            .filter_map(|idx| self.dataset.record(idx))
            .collect()
    }

    /// Beneficial (`相须` / `相使`) pairings that involve `name`.
    pub fn beneficial_relationships(&self, name: &str) -> Vec<BeneficialPairing> {
        let matcher = self.dataset.matcher();
        self.dataset
            .relationships()
            .iter()
            .filter(|rel| BENEFICIAL_TYPES.contains(&rel.kind.as_str()))
            .filter_map(|rel| {
                let partner = if matcher.matches(&rel.herb_a, name) {
                    &rel.herb_b
                } else if matcher.matches(&rel.herb_b, name) {
                    &rel.herb_a
                } else {
                    return None;
                };
                Some(BeneficialPairing {
                    kind: rel.kind.clone(),
                    partner: partner.clone(),
                    effect: rel.effect.clone(),
                    description: rel.description.clone(),
                })
            })
            .collect()
    }

    pub fn statistics(&self) -> DatasetStatistics {
        self.dataset.statistics()
    }
}

fn level_for(severity: Option<&str>) -> &'static str {
    match severity {
        Some("medium") => "warning",
        Some("low") => "caution",
        _ => "critical",
    }
}
