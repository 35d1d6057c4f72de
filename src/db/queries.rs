use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobOutcome, JobRecord, JobStatus};
use crate::services::job_store::{
    exhausted_reason, ClaimConflict, ClaimOutcome, JobStore, StoreError,
};

const JOB_COLUMNS: &str = "id, filename, stored_path, upload_time, status, duration, \
     thumbnail_ref, error, attempt_count, lease_expires_at, processed_time";

/// PostgreSQL-backed [`JobStore`].
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_record(row: &PgRow) -> Result<JobRecord, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("unknown status {:?}", status_str)))?;

    Ok(JobRecord {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        stored_path: row.try_get("stored_path")?,
        upload_time: row.try_get("upload_time")?,
        status,
        duration: row.try_get("duration")?,
        thumbnail_ref: row.try_get("thumbnail_ref")?,
        error: row.try_get("error")?,
        attempt_count: row.try_get("attempt_count")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        processed_time: row.try_get("processed_time")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, record: &JobRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO video_jobs (id, filename, stored_path, upload_time, status, attempt_count)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.filename)
        .bind(&record.stored_path)
        .bind(record.upload_time)
        .bind(record.status.as_ref())
        .bind(record.attempt_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(record.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM video_jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM video_jobs ORDER BY upload_time DESC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    async fn claim(
        &self,
        id: Uuid,
        max_attempts: i32,
        lease: Duration,
    ) -> Result<ClaimOutcome, StoreError> {
        let claimed = sqlx::query(&format!(
            r#"
            UPDATE video_jobs
            SET status = 'processing',
                attempt_count = attempt_count + 1,
                lease_expires_at = NOW() + make_interval(secs => $3)
            WHERE id = $1
              AND attempt_count < $2
              AND (status = 'pending'
                   OR (status = 'processing' AND lease_expires_at <= NOW()))
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(max_attempts)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            return Ok(ClaimOutcome::Claimed(row_to_record(&row)?));
        }

        // Abandoned by its last owner with nothing left to try.
        let exhausted = sqlx::query(&format!(
            r#"
            UPDATE video_jobs
            SET status = 'failed',
                error = $3,
                lease_expires_at = NULL,
                processed_time = NOW()
            WHERE id = $1
              AND status = 'processing'
              AND lease_expires_at <= NOW()
              AND attempt_count >= $2
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(max_attempts)
        .bind(exhausted_reason(max_attempts))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = exhausted {
            return Ok(ClaimOutcome::Exhausted(row_to_record(&row)?));
        }

        let conflict = match self.get(id).await? {
            None => ClaimConflict::NotFound,
            Some(r) if r.status.is_terminal() => ClaimConflict::Terminal,
            Some(r) if r.status == JobStatus::Pending => ClaimConflict::AttemptsSpent,
            Some(_) => ClaimConflict::Owned,
        };
        Ok(ClaimOutcome::Conflict(conflict))
    }

    async fn renew_lease(
        &self,
        id: Uuid,
        attempt: i32,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE video_jobs
            SET lease_expires_at = NOW() + make_interval(secs => $3)
            WHERE id = $1 AND status = 'processing' AND attempt_count = $2
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: JobStatus,
        attempt: i32,
        outcome: &JobOutcome,
    ) -> Result<bool, StoreError> {
        let to = outcome.status();
        if !expected.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from: expected, to });
        }

        let (duration, thumbnail_ref, error) = match outcome {
            JobOutcome::Done {
                duration,
                thumbnail_ref,
            } => (Some(duration.as_str()), Some(thumbnail_ref.as_str()), None),
            JobOutcome::Failed { error } => (None, None, Some(error.as_str())),
        };

        let result = sqlx::query(
            r#"
            UPDATE video_jobs
            SET status = $4,
                duration = $5,
                thumbnail_ref = $6,
                error = $7,
                lease_expires_at = NULL,
                processed_time = NOW()
            WHERE id = $1 AND status = $2 AND attempt_count = $3
            "#,
        )
        .bind(id)
        .bind(expected.as_ref())
        .bind(attempt)
        .bind(to.as_ref())
        .bind(duration)
        .bind(thumbnail_ref)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
