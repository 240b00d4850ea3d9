use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::analysis::AnalysisType;
use crate::models::job::{AnalysisJob, JobStatus, NewAnalysisJob};
use crate::services::registry::{JobRegistry, RegistryError};

const JOB_COLUMNS: &str = "id, sequence, job_id, client_token, media_id, analysis_type, status, \
                           retry_count, error, created_at, updated_at";

/// Postgres-backed job registry shared by the API server and workers.
#[derive(Clone)]
pub struct PgJobRegistry {
    pool: PgPool,
}

impl PgJobRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_job(row: &PgRow) -> Result<AnalysisJob, RegistryError> {
    let analysis_type: String = row.try_get("analysis_type")?;
    let status: String = row.try_get("status")?;

    Ok(AnalysisJob {
        id: row.try_get("id")?,
        sequence: row.try_get("sequence")?,
        job_id: row.try_get("job_id")?,
        client_token: row.try_get("client_token")?,
        media_id: row.try_get("media_id")?,
        analysis_type: AnalysisType::from_str(&analysis_type)
            .map_err(|_| RegistryError::Corrupt(format!("analysis_type '{}'", analysis_type)))?,
        status: JobStatus::from_str(&status)
            .map_err(|_| RegistryError::Corrupt(format!("status '{}'", status)))?,
        retry_count: row.try_get("retry_count")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobRegistry for PgJobRegistry {
    async fn register(&self, job: NewAnalysisJob) -> Result<AnalysisJob, RegistryError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO analysis_jobs (id, job_id, client_token, media_id, analysis_type, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (job_id) DO UPDATE
            SET client_token = EXCLUDED.client_token,
                media_id = EXCLUDED.media_id,
                analysis_type = EXCLUDED.analysis_type,
                updated_at = NOW()
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&job.job_id)
        .bind(&job.client_token)
        .bind(job.media_id)
        .bind(job.analysis_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        row_to_job(&row)
    }

    async fn resolve(&self, job_id: &str) -> Result<AnalysisJob, RegistryError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM analysis_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => row_to_job(&r),
            None => Err(RegistryError::UnknownJob(job_id.to_string())),
        }
    }

    async fn mark_completed(&self, job_id: &str) -> Result<bool, RegistryError> {
        transition(&self.pool, job_id, JobStatus::Completed, None).await
    }

    async fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool, RegistryError> {
        transition(&self.pool, job_id, JobStatus::Failed, Some(error)).await
    }

    async fn increment_retry_count(&self, job_id: &str) -> Result<i32, RegistryError> {
        let row = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET retry_count = retry_count + 1,
                updated_at = NOW()
            WHERE job_id = $1
            RETURNING retry_count
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(r.try_get("retry_count")?),
            None => Err(RegistryError::UnknownJob(job_id.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Move a pending job into a terminal status. Terminal jobs are never touched again.
async fn transition(
    pool: &PgPool,
    job_id: &str,
    status: JobStatus,
    error: Option<&str>,
) -> Result<bool, RegistryError> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = $1,
            error = $2,
            updated_at = NOW()
        WHERE job_id = $3 AND status = 'pending'
        "#,
    )
    .bind(status.to_string())
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }

    let exists = sqlx::query("SELECT 1 FROM analysis_jobs WHERE job_id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    match exists {
        Some(_) => Ok(false),
        None => Err(RegistryError::UnknownJob(job_id.to_string())),
    }
}
