use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::models::job::{AnalysisJob, JobStatus};

/// Job store failures, including misuse of the terminal-write contract.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    /// A terminal write was attempted on a job that is not in progress.
    /// Terminal records are immutable and must never be overwritten.
    #[error("invalid transition for job {id}: job is {status}")]
    InvalidTransition { id: Uuid, status: JobStatus },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt job record: {0}")]
    Decode(String),
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Decode(format!("timestamp {ms} out of range")))
}

fn row_to_job(row: &SqliteRow) -> Result<AnalysisJob, StoreError> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|e| StoreError::Decode(format!("bad job id: {e}")))?;

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|_| StoreError::Decode(format!("unknown status '{status}'")))?;

    let result = match row.try_get::<Option<String>, _>("result_json")? {
        Some(json) => Some(
            serde_json::from_str::<AnalysisResult>(&json)
                .map_err(|e| StoreError::Decode(format!("bad result payload: {e}")))?,
        ),
        None => None,
    };

    Ok(AnalysisJob {
        id,
        status,
        image_key: row.try_get("image_key")?,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        updated_at: millis_to_datetime(row.try_get("updated_at")?)?,
        result,
        error: row.try_get("error")?,
    })
}

/// Insert a new job in the queued state.
pub async fn create_job(pool: &SqlitePool, image_key: &str) -> Result<AnalysisJob, StoreError> {
    let id = Uuid::new_v4();
    let ts = now_millis();

    let row = sqlx::query(
        r#"
        INSERT INTO analysis_jobs (id, status, image_key, created_at, updated_at)
        VALUES (?1, 'queued', ?2, ?3, ?3)
        RETURNING id, status, image_key, created_at, updated_at, result_json, error
        "#,
    )
    .bind(id.to_string())
    .bind(image_key)
    .bind(ts)
    .fetch_one(pool)
    .await?;

    row_to_job(&row)
}

/// Get a job by id.
pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<AnalysisJob, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, status, image_key, created_at, updated_at, result_json, error
        FROM analysis_jobs
        WHERE id = ?1
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_job(&row),
        None => Err(StoreError::NotFound(job_id)),
    }
}

/// Atomically claim the oldest queued job, moving it to in_progress.
///
/// The claim is a single compare-and-swap UPDATE, so N concurrent worker
/// loops sharing the store get at most one winner per job. Returns `None`
/// when the queue is empty (or another claimer won the race).
pub async fn claim_next_job(pool: &SqlitePool) -> Result<Option<AnalysisJob>, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'in_progress', updated_at = ?1
        WHERE id = (
            SELECT id FROM analysis_jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
        )
        AND status = 'queued'
        RETURNING id, status, image_key, created_at, updated_at, result_json, error
        "#,
    )
    .bind(now_millis())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// Write the terminal done state with its result payload.
pub async fn complete_job(
    pool: &SqlitePool,
    job_id: Uuid,
    result: &AnalysisResult,
) -> Result<AnalysisJob, StoreError> {
    let json = serde_json::to_string(result)
        .map_err(|e| StoreError::Decode(format!("unserializable result: {e}")))?;

    let row = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'done', result_json = ?1, error = NULL, updated_at = ?2
        WHERE id = ?3 AND status = 'in_progress'
        RETURNING id, status, image_key, created_at, updated_at, result_json, error
        "#,
    )
    .bind(&json)
    .bind(now_millis())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_job(&row),
        None => {
            let current = get_job(pool, job_id).await?;
            Err(StoreError::InvalidTransition { id: job_id, status: current.status })
        }
    }
}

/// Write the terminal failed state with a short machine-readable error.
pub async fn fail_job(
    pool: &SqlitePool,
    job_id: Uuid,
    error: &str,
) -> Result<AnalysisJob, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'failed', error = ?1, result_json = NULL, updated_at = ?2
        WHERE id = ?3 AND status = 'in_progress'
        RETURNING id, status, image_key, created_at, updated_at, result_json, error
        "#,
    )
    .bind(error)
    .bind(now_millis())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_job(&row),
        None => {
            let current = get_job(pool, job_id).await?;
            Err(StoreError::InvalidTransition { id: job_id, status: current.status })
        }
    }
}

/// Number of jobs still waiting to be claimed.
pub async fn count_queued(pool: &SqlitePool) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM analysis_jobs WHERE status = 'queued'")
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("n")?)
}
