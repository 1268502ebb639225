//! Session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::safety::NamedSubstance;

/// One substance in a composition, as sent by the client.
///
/// Field names follow the client wire format; the aliases accept the
/// alternative spellings seen in saved records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionItem {
    #[serde(
        rename = "medicine_id",
        alias = "id",
        alias = "substance_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub substance_id: Option<String>,
    #[serde(rename = "name", alias = "display_name")]
    pub display_name: String,
    #[serde(
        rename = "dosage",
        alias = "dose",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl CompositionItem {
    /// Item with only a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            substance_id: None,
            display_name: name.into(),
            dose: None,
            role: None,
        }
    }

    #[must_use]
    pub fn with_dose(mut self, dose: impl Into<String>) -> Self {
        self.dose = Some(dose.into());
        self
    }
}

impl NamedSubstance for CompositionItem {
    fn substance_name(&self) -> &str {
        &self.display_name
    }
}

/// Ordered list of items. Treated positionally; duplicates are allowed.
pub type Composition = Vec<CompositionItem>;

/// Opaque payload returned by the deep-analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisResult(pub serde_json::Value);

/// The in-progress prescription for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub composition: Composition,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_id: Option<String>,
}

impl SessionState {
    /// Empty composition with the given display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            composition: Vec::new(),
            name: name.into(),
            notes: String::new(),
            analysis: None,
            simulation_id: None,
            formula_id: None,
        }
    }

    /// Replace the composition wholesale and apply optional metadata.
    ///
    /// Any stored analysis no longer describes the composition and is dropped.
    pub fn apply_update(&mut self, update: UpdateComposition) {
        self.composition = update.composition;
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(notes) = update.notes {
            self.notes = notes;
        }
        self.analysis = None;
    }
}

impl From<SimulationRecord> for SessionState {
    fn from(record: SimulationRecord) -> Self {
        Self {
            composition: record.composition,
            name: record.name,
            notes: record.notes.unwrap_or_default(),
            analysis: record.analysis,
            simulation_id: Some(record.simulation_id),
            formula_id: record.formula_id,
        }
    }
}

/// Client edit: the full new composition plus optional metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateComposition {
    pub composition: Composition,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A durably saved simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub simulation_id: Uuid,
    pub user_id: String,
    pub formula_id: Option<String>,
    pub name: String,
    pub composition: Composition,
    pub notes: Option<String>,
    pub analysis: Option<AnalysisResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SimulationRecord {
    /// Snapshot `state` for `user_id`, reusing the state's simulation id
    /// when it has one.
    pub fn from_state(user_id: &str, state: &SessionState, formula_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            simulation_id: state.simulation_id.unwrap_or_else(Uuid::new_v4),
            user_id: user_id.to_string(),
            formula_id: formula_id.or_else(|| state.formula_id.clone()),
            name: state.name.clone(),
            composition: state.composition.clone(),
            notes: (!state.notes.is_empty()).then(|| state.notes.clone()),
            analysis: state.analysis.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_accepts_alternative_field_names() {
        let a: CompositionItem =
            serde_json::from_value(json!({"id": "m1", "name": "甘草", "dosage": "6g"})).unwrap();
        let b: CompositionItem = serde_json::from_value(
            json!({"substance_id": "m1", "display_name": "甘草", "dose": "6g"}),
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            json!({"medicine_id": "m1", "name": "甘草", "dosage": "6g"})
        );
    }

    #[test]
    fn test_apply_update_clears_analysis() {
        let mut state = SessionState::new("方");
        state.notes = "keep".to_string();
        state.analysis = Some(AnalysisResult(json!({"analysis": "ok"})));
        state.apply_update(UpdateComposition {
            composition: vec![CompositionItem::named("人参")],
            name: Some("新方".to_string()),
            notes: None,
        });
        assert_eq!(state.name, "新方");
        assert_eq!(state.notes, "keep");
        assert_eq!(state.composition.len(), 1);
        assert!(state.analysis.is_none());
    }

    #[test]
    fn test_state_decodes_with_missing_fields() {
        let state: SessionState = serde_json::from_value(json!({"composition": []})).unwrap();
        assert_eq!(state.name, "");
        assert!(state.simulation_id.is_none());
    }

    #[test]
    fn test_record_state_conversion_keeps_identity() {
        let mut state = SessionState::new("方");
        state.composition.push(CompositionItem::named("白术").with_dose("9g"));
        let record = SimulationRecord::from_state("u1", &state, Some("f1".to_string()));
        assert!(record.notes.is_none());
        let restored = SessionState::from(record.clone());
        assert_eq!(restored.simulation_id, Some(record.simulation_id));
        assert_eq!(restored.formula_id.as_deref(), Some("f1"));
        assert_eq!(restored.composition, state.composition);
    }
}
