//! Reconstruction job records and their state machine
//!
//! ```text
//! pending ──claim──▶ processing ──finish──▶ completed | failed
//!                       ▲                         │
//!                       └──────── reprocess ──────┘
//! ```
//!
//! `result` is populated exactly when the status is terminal.

use chrono::{DateTime, Utc};
use neuropixel_common::error::{NeuroPixelError, Result};
use neuropixel_engine::InferenceOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Job identifier
pub type JobId = Uuid;

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded outcome of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResult {
    Reconstruction {
        mean_image: String,
        uncertainty_image: String,
    },
    Failure {
        message: String,
    },
}

impl JobResult {
    /// Terminal status this result implies
    pub fn status(&self) -> JobStatus {
        match self {
            JobResult::Reconstruction { .. } => JobStatus::Completed,
            JobResult::Failure { .. } => JobStatus::Failed,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        JobResult::Failure {
            message: message.into(),
        }
    }
}

impl From<InferenceOutcome> for JobResult {
    fn from(outcome: InferenceOutcome) -> Self {
        match outcome {
            InferenceOutcome::Success {
                mean_image,
                uncertainty_image,
            } => JobResult::Reconstruction {
                mean_image,
                uncertainty_image,
            },
            InferenceOutcome::Error { message } => JobResult::Failure { message },
        }
    }
}

/// One uploaded image and the state of its reconstruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionJob {
    pub id: JobId,

    /// Name the file was stored under
    pub filename: String,

    /// Opaque blob store path
    pub file_path: String,

    /// Declared media type of the upload
    pub media_type: String,

    pub status: JobStatus,

    pub result: Option<JobResult>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ReconstructionJob {
    /// New job in the pending state
    pub fn new(filename: String, file_path: String, media_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            filename,
            file_path,
            media_type,
            status: JobStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// pending → processing, taken by a worker
    pub fn claim(&mut self) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(NeuroPixelError::conflict(format!(
                "Job {} is {}, not pending",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Processing;
        self.touch();
        Ok(())
    }

    /// Any state but processing → processing, clearing the previous result
    pub fn begin_reprocess(&mut self) -> Result<()> {
        if self.status == JobStatus::Processing {
            return Err(NeuroPixelError::conflict(format!(
                "Job {} is already being processed",
                self.id
            )));
        }
        self.status = JobStatus::Processing;
        self.result = None;
        self.touch();
        Ok(())
    }

    /// processing → completed | failed
    pub fn finish(&mut self, result: JobResult) -> Result<JobStatus> {
        if self.status != JobStatus::Processing {
            return Err(NeuroPixelError::conflict(format!(
                "Job {} is {}, cannot record a result",
                self.id, self.status
            )));
        }
        self.status = result.status();
        self.result = Some(result);
        self.touch();
        Ok(self.status)
    }

    /// Base64 PNGs of a completed job
    pub fn images(&self) -> Option<(&str, &str)> {
        match &self.result {
            Some(JobResult::Reconstruction {
                mean_image,
                uncertainty_image,
            }) => Some((mean_image.as_str(), uncertainty_image.as_str())),
            _ => None,
        }
    }

    /// Error message of a failed job
    pub fn error(&self) -> Option<&str> {
        match &self.result {
            Some(JobResult::Failure { message }) => Some(message.as_str()),
            _ => None,
        }
    }
}
