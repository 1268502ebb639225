use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::safety::{BeneficialPairing, DatasetStatistics, SafetyVerdict};
use crate::simulation::Composition;

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub composition: Composition,
}

#[derive(Debug, Serialize)]
pub struct RelationshipsResponse {
    pub name: String,
    pub relationships: Vec<BeneficialPairing>,
}

/// POST /api/safety/check - Evaluate a composition without a session.
pub async fn check(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Json<SafetyVerdict> {
    Json(state.evaluator.check(&req.composition))
}

/// GET /api/safety/relationships/{name} - Beneficial pairings for a substance.
pub async fn relationships(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<RelationshipsResponse> {
    let relationships = state.evaluator.beneficial_relationships(&name);
    Json(RelationshipsResponse {
        name,
        relationships,
    })
}

/// GET /api/safety/stats
pub async fn stats(State(state): State<AppState>) -> Json<DatasetStatistics> {
    Json(state.evaluator.statistics())
}
