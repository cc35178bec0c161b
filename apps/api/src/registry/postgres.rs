use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::model::{MLModel, MLModelRow, ModelMetrics, PredictionLogEntry, PredictionLogRow};
use crate::registry::{Activation, ModelRegistry, OutcomeUpdate, RegistryError};
use crate::training::data::TrainingSample;

/// Registry over the `ml_models` and `prediction_log` tables.
#[derive(Clone)]
pub struct PgModelRegistry {
    pool: PgPool,
}

impl PgModelRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_models(rows: Vec<MLModelRow>) -> Result<Vec<MLModel>, RegistryError> {
    rows.into_iter()
        .map(|r| MLModel::try_from(r).map_err(RegistryError::from))
        .collect()
}

#[async_trait]
impl ModelRegistry for PgModelRegistry {
    async fn insert(&self, model: &MLModel) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            INSERT INTO ml_models
                (id, name, version, model_type, algorithm, accuracy, parameters,
                 active, metadata, created_at, updated_at, deployed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(model.id)
        .bind(&model.name)
        .bind(&model.version)
        .bind(&model.model_type)
        .bind(&model.algorithm)
        .bind(model.accuracy)
        .bind(&model.parameters)
        .bind(model.active)
        .bind(serde_json::to_value(&model.metadata)?)
        .bind(model.created_at)
        .bind(model.updated_at)
        .bind(model.deployed_at)
        .execute(&self.pool)
        .await?;

        info!(
            "Registered model {} ({} v{}, type {})",
            model.id, model.name, model.version, model.model_type
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MLModel>, RegistryError> {
        let row = sqlx::query_as::<_, MLModelRow>("SELECT * FROM ml_models WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(MLModel::try_from).transpose().map_err(RegistryError::from)
    }

    async fn list_active(&self) -> Result<Vec<MLModel>, RegistryError> {
        let rows = sqlx::query_as::<_, MLModelRow>(
            "SELECT * FROM ml_models WHERE active ORDER BY model_type, deployed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        into_models(rows)
    }

    async fn list_by_type(&self, model_type: &str) -> Result<Vec<MLModel>, RegistryError> {
        let rows = sqlx::query_as::<_, MLModelRow>(
            "SELECT * FROM ml_models WHERE model_type = $1 ORDER BY created_at ASC",
        )
        .bind(model_type)
        .fetch_all(&self.pool)
        .await?;
        into_models(rows)
    }

    /// One transaction: take a per-type advisory lock so concurrent deployments of the same
    /// type queue up, then lock the target row, deactivate siblings and activate.
    /// No row lock is taken before the advisory lock, so two deployments cannot deadlock.
    /// The partial unique index on (model_type) WHERE active backs this at the schema level.
    async fn activate(&self, id: Uuid, at: DateTime<Utc>) -> Result<Activation, RegistryError> {
        let mut tx = self.pool.begin().await?;

        // model_type never changes after insert, so a plain read is enough to pick the lock.
        let model_type: Option<String> =
            sqlx::query_scalar("SELECT model_type FROM ml_models WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let model_type = model_type.ok_or(RegistryError::NotFound(id))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&model_type)
            .execute(&mut *tx)
            .await?;

        let target: Option<MLModelRow> =
            sqlx::query_as("SELECT * FROM ml_models WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let target = target.ok_or(RegistryError::NotFound(id))?;

        let deactivated: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE ml_models
            SET active = FALSE, updated_at = $3
            WHERE model_type = $1 AND active AND id <> $2
            RETURNING id
            "#,
        )
        .bind(&target.model_type)
        .bind(id)
        .bind(at)
        .fetch_all(&mut *tx)
        .await?;

        let activated: MLModelRow = sqlx::query_as(
            r#"
            UPDATE ml_models
            SET active = TRUE, deployed_at = $2, updated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Activation {
            model: MLModel::try_from(activated)?,
            deactivated,
        })
    }

    async fn record_metrics(&self, id: Uuid, metrics: &ModelMetrics) -> Result<(), RegistryError> {
        let result = sqlx::query(
            r#"
            UPDATE ml_models
            SET metadata = jsonb_set(metadata, '{last_metrics}', $2, true), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(serde_json::to_value(metrics)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    async fn log_prediction(&self, entry: &PredictionLogEntry) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            INSERT INTO prediction_log
                (id, model_id, model_type, candidate_id, job_id, prediction,
                 confidence, features, metadata, outcome, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.model_id)
        .bind(&entry.model_type)
        .bind(entry.candidate_id)
        .bind(entry.job_id)
        .bind(entry.prediction)
        .bind(entry.confidence)
        .bind(serde_json::to_value(&entry.features)?)
        .bind(serde_json::to_value(&entry.metadata)?)
        .bind(entry.outcome)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        prediction_id: Uuid,
        outcome: bool,
    ) -> Result<Option<OutcomeUpdate>, RegistryError> {
        let updated: Option<PredictionLogRow> = sqlx::query_as(
            r#"
            UPDATE prediction_log
            SET outcome = $2, outcome_at = NOW()
            WHERE id = $1 AND outcome IS NULL
            RETURNING id, model_id, model_type, candidate_id, job_id, prediction,
                      confidence, features, metadata, outcome, created_at
            "#,
        )
        .bind(prediction_id)
        .bind(outcome)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = updated {
            return Ok(Some(OutcomeUpdate::Recorded(PredictionLogEntry::try_from(row)?)));
        }

        // Either unknown or already labeled.
        let existing: Option<PredictionLogRow> = sqlx::query_as(
            r#"
            SELECT id, model_id, model_type, candidate_id, job_id, prediction,
                   confidence, features, metadata, outcome, created_at
            FROM prediction_log
            WHERE id = $1
            "#,
        )
        .bind(prediction_id)
        .fetch_optional(&self.pool)
        .await?;
        existing
            .map(|row| PredictionLogEntry::try_from(row).map(OutcomeUpdate::AlreadyRecorded))
            .transpose()
            .map_err(RegistryError::from)
    }

    async fn labeled_predictions(
        &self,
        model_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(f64, bool)>, RegistryError> {
        let rows: Vec<(f64, bool)> = sqlx::query_as(
            r#"
            SELECT prediction, outcome
            FROM prediction_log
            WHERE model_id = $1 AND outcome IS NOT NULL
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(model_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn labeled_samples(
        &self,
        model_type: &str,
        limit: i64,
    ) -> Result<Vec<TrainingSample>, RegistryError> {
        let rows: Vec<(serde_json::Value, bool)> = sqlx::query_as(
            r#"
            SELECT features, outcome FROM (
                SELECT features, outcome, created_at
                FROM prediction_log
                WHERE model_type = $1 AND outcome IS NOT NULL
                ORDER BY created_at DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC
            "#,
        )
        .bind(model_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(features, label)| -> Result<TrainingSample, RegistryError> {
                Ok(TrainingSample {
                    features: serde_json::from_value(features)?,
                    label,
                })
            })
            .collect()
    }
}
