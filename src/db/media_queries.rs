use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::models::analysis::{AnalysisResult, AnalysisType};
use crate::models::job::AppliedJob;
use crate::models::media::{MediaAnalysisResults, MediaKind, MediaRecord, MergeOutcome};
use crate::services::media_store::{MediaStore, StoreError};

/// Postgres view of the application's `media` table.
#[derive(Clone)]
pub struct PgMediaStore {
    pool: PgPool,
}

impl PgMediaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaStore for PgMediaStore {
    async fn get_media(&self, media_id: i64) -> Result<Option<MediaRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, disk, path, kind, analysis_results, analysis_applied, analysis_job_ids
            FROM media
            WHERE id = $1
            "#,
        )
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        let kind: String = r.try_get("kind")?;
        let Json(results): Json<HashMap<AnalysisType, AnalysisResult>> =
            r.try_get("analysis_results")?;
        let Json(applied): Json<HashMap<AnalysisType, AppliedJob>> =
            r.try_get("analysis_applied")?;
        let Json(job_ids): Json<HashMap<AnalysisType, String>> = r.try_get("analysis_job_ids")?;

        Ok(Some(MediaRecord {
            id: r.try_get("id")?,
            disk: r.try_get("disk")?,
            path: r.try_get("path")?,
            kind: parse_kind(&kind)?,
            analysis: MediaAnalysisResults {
                results,
                applied,
                job_ids,
            },
        }))
    }

    async fn update_analysis_results(
        &self,
        media_id: i64,
        result: &AnalysisResult,
        applied: &AppliedJob,
    ) -> Result<MergeOutcome, StoreError> {
        let key = result.analysis_type().as_str();

        // Single statement: the sequence guard and both writes see the same row version
        let updated = sqlx::query(
            r#"
            UPDATE media
            SET analysis_results = jsonb_set(analysis_results, ARRAY[$2::text], $3::jsonb, true),
                analysis_applied = jsonb_set(analysis_applied, ARRAY[$2::text], $4::jsonb, true),
                updated_at = NOW()
            WHERE id = $1
              AND COALESCE((analysis_applied -> $2 ->> 'sequence')::bigint, 0) <= $5
            RETURNING id
            "#,
        )
        .bind(media_id)
        .bind(key)
        .bind(Json(result))
        .bind(Json(applied))
        .bind(applied.sequence)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(MergeOutcome::Applied);
        }

        let row = sqlx::query("SELECT analysis_applied -> $2 AS current FROM media WHERE id = $1")
            .bind(media_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(r) = row else {
            return Err(StoreError::NotFound(media_id));
        };

        let current: Option<Json<AppliedJob>> = r.try_get("current")?;
        match current {
            Some(Json(current)) => Ok(MergeOutcome::Stale { current }),
            // Guard failed but nothing is recorded: the row changed underneath us
            None => Err(StoreError::Database(sqlx::Error::RowNotFound)),
        }
    }

    async fn update_job_id(
        &self,
        media_id: i64,
        job_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE media
            SET analysis_job_ids = jsonb_set(analysis_job_ids, ARRAY[$2::text], to_jsonb($3::text), true),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(media_id)
        .bind(analysis_type.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(media_id));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_kind(kind: &str) -> Result<MediaKind, StoreError> {
    MediaKind::from_str(kind).map_err(|_| StoreError::Corrupt(format!("kind '{}'", kind)))
}
