//! Interaction reference data.
//!
//! Two JSON files are read once at startup:
//!
//! - the incompatibility table (`十八反` / `十九畏`), shaped as
//!   `{ "aliases"?: {canonical: [synonym]}, "data": [InteractionRecord] }`
//! - the four-relationship table (`相须` / `相使` / `相畏` / `相杀`), shaped as
//!   `{ "relationships": [RelationshipRecord] }`
//!
//! Loading is fail-open: a missing or corrupt file yields an empty table and
//! a warning, never an error.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::matcher::NameMatcher;

/// Classification for the eighteen antagonisms.
pub const EIGHTEEN_ANTAGONISMS: &str = "十八反";
/// Classification for the nineteen fears.
pub const NINETEEN_FEARS: &str = "十九畏";
/// Relationship types that describe beneficial pairings.
pub const BENEFICIAL_TYPES: [&str; 2] = ["相须", "相使"];
const RELATIONSHIP_TYPES: [&str; 4] = ["相须", "相使", "相畏", "相杀"];

/// A known conflict between two substances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(rename = "herb_a")]
    pub substance_a: String,
    #[serde(rename = "herb_b")]
    pub substance_b: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Option<String>,
}

/// A four-relationship entry between two substances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub herb_a: String,
    pub herb_b: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub effect: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncompatibilityFile {
    #[serde(default)]
    aliases: Option<HashMap<String, Vec<String>>>,
    data: Vec<InteractionRecord>,
}

#[derive(Debug, Deserialize)]
struct RelationshipFile {
    relationships: Vec<RelationshipRecord>,
}

/// One side of an indexed interaction: the partner name and the record it
/// came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjacent<'a> {
    pub partner: &'a str,
    pub record: usize,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    record: usize,
    partner_is_b: bool,
}

/// Counts reported by the statistics endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetStatistics {
    pub available: bool,
    pub total_incompatibilities: usize,
    pub eighteen_antagonisms: usize,
    pub nineteen_fears: usize,
    pub total_relationships: usize,
    pub relationship_types: BTreeMap<String, usize>,
}

/// Immutable, bidirectionally indexed interaction data.
#[derive(Debug, Clone)]
pub struct InteractionDataset {
    records: Vec<InteractionRecord>,
    relationships: Vec<RelationshipRecord>,
    adjacency: HashMap<String, Vec<Edge>>,
    matcher: NameMatcher,
    available: bool,
}

impl Default for InteractionDataset {
    fn default() -> Self {
        Self::empty()
    }
}

impl InteractionDataset {
    /// A dataset with no records, flagged as unavailable.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            relationships: Vec::new(),
            adjacency: HashMap::new(),
            matcher: NameMatcher::default(),
            available: false,
        }
    }

    /// Build from in-memory records using the default alias table.
    #[must_use]
    pub fn from_records(
        records: Vec<InteractionRecord>,
        relationships: Vec<RelationshipRecord>,
    ) -> Self {
        Self::build(records, relationships, NameMatcher::default(), true)
    }

    fn build(
        records: Vec<InteractionRecord>,
        relationships: Vec<RelationshipRecord>,
        matcher: NameMatcher,
        available: bool,
    ) -> Self {
        let mut adjacency: HashMap<String, Vec<Edge>> = HashMap::new();
        for (idx, rec) in records.iter().enumerate() {
            let a = rec.substance_a.trim().to_string();
            let b = rec.substance_b.trim().to_string();
            adjacency.entry(a).or_default().push(Edge {
                record: idx,
                partner_is_b: true,
            });
            adjacency.entry(b).or_default().push(Edge {
                record: idx,
                partner_is_b: false,
            });
        }

        Self {
            records,
            relationships,
            adjacency,
            matcher,
            available,
        }
    }

    /// Load both tables from disk. Never fails; see module docs.
    pub fn load(incompatibility_path: &Path, relationship_path: &Path) -> Self {
        let (records, matcher, available) = match read_json::<IncompatibilityFile>(
            incompatibility_path,
        ) {
            Ok(file) => {
                let matcher = file
                    .aliases
                    .map_or_else(NameMatcher::default, NameMatcher::from_table);
                info!(
                    name: "dataset.loaded",
                    path = %incompatibility_path.display(),
                    records = file.data.len(),
                    "Incompatibility data loaded"
                );
                (file.data, matcher, true)
            }
            Err(e) => {
                warn!(
                    name: "dataset.unavailable",
                    path = %incompatibility_path.display(),
                    error = %e,
                    "Incompatibility data failed to load; safety checks will report no conflicts"
                );
                (Vec::new(), NameMatcher::default(), false)
            }
        };

        let relationships = match read_json::<RelationshipFile>(relationship_path) {
            Ok(file) => {
                info!(
                    name: "dataset.loaded",
                    path = %relationship_path.display(),
                    records = file.relationships.len(),
                    "Relationship data loaded"
                );
                file.relationships
            }
            Err(e) => {
                warn!(
                    name: "dataset.unavailable",
                    path = %relationship_path.display(),
                    error = %e,
                    "Relationship data failed to load"
                );
                Vec::new()
            }
        };

        Self::build(records, relationships, matcher, available)
    }

    /// Whether the incompatibility table loaded successfully.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn matcher(&self) -> &NameMatcher {
        &self.matcher
    }

    pub fn records(&self) -> &[InteractionRecord] {
        &self.records
    }

    pub fn record(&self, idx: usize) -> Option<&InteractionRecord> {
        self.records.get(idx)
    }

    pub fn relationships(&self) -> &[RelationshipRecord] {
        &self.relationships
    }

    /// Direct neighbours of an indexed name (exact key lookup).
    pub fn neighbours(&self, key: &str) -> impl Iterator<Item = Adjacent<'_>> {
        self.adjacency
            .get(key)
            .into_iter()
            .flatten()
            .map(|edge| {
                let rec = &self.records[edge.record];
                let partner = if edge.partner_is_b {
                    rec.substance_b.trim()
                } else {
                    rec.substance_a.trim()
                };
                Adjacent {
                    partner,
                    record: edge.record,
                }
            })
    }

    /// Index keys that refer to `name`: the exact key first, then members of
    /// its alias group, then keys related by substring containment.
    pub fn keys_for(&self, name: &str) -> Vec<&str> {
        let name = name.trim();
        let mut keys: Vec<&str> = Vec::new();
        if name.is_empty() {
            return keys;
        }

        if let Some((key, _)) = self.adjacency.get_key_value(name) {
            keys.push(key.as_str());
        }
        if let Some(group) = self.matcher.group_of(name) {
            for member in group.members() {
                if let Some((key, _)) = self.adjacency.get_key_value(member) {
                    if !keys.contains(&key.as_str()) {
                        keys.push(key.as_str());
                    }
                }
            }
        }
        let mut by_substring: Vec<&str> = self
            .adjacency
            .keys()
            .map(String::as_str)
            .filter(|k| !k.is_empty() && (k.contains(name) || name.contains(k)))
            .filter(|k| !keys.contains(k))
            .collect();
        by_substring.sort_unstable();
        keys.extend(by_substring);
        keys
    }

    pub fn statistics(&self) -> DatasetStatistics {
        let count = |kind: &str| self.records.iter().filter(|r| r.kind == kind).count();
        let relationship_types = RELATIONSHIP_TYPES
            .iter()
            .map(|t| {
                let n = self.relationships.iter().filter(|r| r.kind == *t).count();
                ((*t).to_string(), n)
            })
            .collect();

        DatasetStatistics {
            available: self.available,
            total_incompatibilities: self.records.len(),
            eighteen_antagonisms: count(EIGHTEEN_ANTAGONISMS),
            nineteen_fears: count(NINETEEN_FEARS),
            total_relationships: self.relationships.len(),
            relationship_types,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
