//! Postgres repository tests.
//!
//! These run only when `DATABASE_URL` points at a reachable database; they
//! are skipped otherwise.

use formula_sim::persistence::{PostgresProvider, SimulationRepository};
use formula_sim::simulation::{AnalysisResult, CompositionItem, SessionState, SimulationRecord};
use serde_json::json;

// =============================================================================
// Test Utilities
// =============================================================================

fn get_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

async fn setup_persistence() -> Option<PostgresProvider> {
    let url = get_database_url()?;
    PostgresProvider::new(&url).await.ok()
}

fn unique_user() -> String {
    format!("test-user-{}", uuid::Uuid::new_v4())
}

// =============================================================================
// Repository
// =============================================================================

#[tokio::test]
async fn test_save_and_find_latest() {
    let Some(repo) = setup_persistence().await else {
        eprintln!("Skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let user = unique_user();

    assert!(repo.find_latest_for_user(&user).await.unwrap().is_none());

    let mut state = SessionState::new("四物汤");
    state.composition = vec![
        CompositionItem::named("熟地黄").with_dose("12g"),
        CompositionItem::named("当归").with_dose("9g"),
    ];
    state.notes = "补血".to_string();
    state.analysis = Some(AnalysisResult(json!({ "analysis": "ok" })));

    let saved = repo
        .save(&SimulationRecord::from_state(&user, &state, Some("f-1".to_string())))
        .await
        .unwrap();
    let found = repo.find_latest_for_user(&user).await.unwrap().unwrap();
    assert_eq!(found.simulation_id, saved.simulation_id);
    assert_eq!(found.composition, state.composition);
    assert_eq!(found.notes.as_deref(), Some("补血"));
    assert_eq!(found.analysis, state.analysis);
    assert_eq!(found.formula_id.as_deref(), Some("f-1"));
}

#[tokio::test]
async fn test_save_updates_in_place() {
    let Some(repo) = setup_persistence().await else {
        eprintln!("Skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let user = unique_user();

    let mut state = SessionState::new("方一");
    state.composition.push(CompositionItem::named("黄芪"));
    let first = repo
        .save(&SimulationRecord::from_state(&user, &state, None))
        .await
        .unwrap();

    state.simulation_id = Some(first.simulation_id);
    state.composition.push(CompositionItem::named("白术"));
    let second = repo
        .save(&SimulationRecord::from_state(&user, &state, None))
        .await
        .unwrap();

    assert_eq!(second.simulation_id, first.simulation_id);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at >= first.updated_at);
    assert_eq!(second.composition.len(), 2);
}

#[tokio::test]
async fn test_latest_is_most_recently_updated() {
    let Some(repo) = setup_persistence().await else {
        eprintln!("Skipping: DATABASE_URL not set or unreachable");
        return;
    };
    let user = unique_user();

    let older = repo
        .save(&SimulationRecord::from_state(&user, &SessionState::new("旧方"), None))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let newer = repo
        .save(&SimulationRecord::from_state(&user, &SessionState::new("新方"), None))
        .await
        .unwrap();
    assert_ne!(older.simulation_id, newer.simulation_id);

    let found = repo.find_latest_for_user(&user).await.unwrap().unwrap();
    assert_eq!(found.simulation_id, newer.simulation_id);
    assert_eq!(found.name, "新方");
}
