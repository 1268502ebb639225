use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::persistence::SimulationRepository;
use crate::simulation::model::{AnalysisResult, SimulationRecord};

#[derive(Debug)]
pub struct PostgresProvider {
    pool: PgPool,
}

impl PostgresProvider {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn record_from_row(row: &PgRow) -> Result<SimulationRecord> {
    let composition: serde_json::Value = row.try_get("modified_composition")?;
    let analysis: Option<serde_json::Value> = row.try_get("ai_analysis")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(SimulationRecord {
        simulation_id: row.try_get::<Uuid, _>("simulation_id")?,
        user_id: row.try_get("user_id")?,
        formula_id: row.try_get("formula_id")?,
        name: row.try_get("name")?,
        composition: serde_json::from_value(composition)?,
        notes: row.try_get("user_notes")?,
        analysis: analysis.map(AnalysisResult),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl SimulationRepository for PostgresProvider {
    async fn find_latest_for_user(&self, user_id: &str) -> Result<Option<SimulationRecord>> {
        let row = sqlx::query(
            r"
            SELECT simulation_id, user_id, formula_id, name, modified_composition,
                   user_notes, ai_analysis, created_at, updated_at
            FROM user_simulations
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(&self, record: &SimulationRecord) -> Result<SimulationRecord> {
        let composition = serde_json::to_value(&record.composition)?;
        let analysis = record.analysis.as_ref().map(|a| a.0.clone());

        let row = sqlx::query(
            r"
            INSERT INTO user_simulations
                (simulation_id, user_id, formula_id, name, modified_composition,
                 user_notes, ai_analysis, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (simulation_id) DO UPDATE SET
                formula_id = EXCLUDED.formula_id,
                name = EXCLUDED.name,
                modified_composition = EXCLUDED.modified_composition,
                user_notes = EXCLUDED.user_notes,
                ai_analysis = EXCLUDED.ai_analysis,
                updated_at = NOW()
            RETURNING simulation_id, user_id, formula_id, name, modified_composition,
                      user_notes, ai_analysis, created_at, updated_at
            ",
        )
        .bind(record.simulation_id)
        .bind(&record.user_id)
        .bind(&record.formula_id)
        .bind(&record.name)
        .bind(composition)
        .bind(&record.notes)
        .bind(analysis)
        .fetch_one(&self.pool)
        .await?;

        record_from_row(&row)
    }
}
