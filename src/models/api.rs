use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analysis::AnalysisResult;
use super::job::{AnalysisJob, JobStatus};

/// Response after storing an uploaded image.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub key: String,
}

/// Request to analyze a previously uploaded image.
#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[garde(length(min = 1, max = 1024))]
    pub key: String,
}

/// Response after enqueueing an analysis job.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Point-in-time snapshot of a job, as served to clients.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusResponse {
    pub fn from_job(job: AnalysisJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
