//! Job identity, lifecycle states and the read models handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::service::SubServiceResult;

/// Unique identifier for background jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    /// Time-ordered (v7) id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// Opaque caller-session token. A session owns at most one running job.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap a caller-supplied token as is.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Fresh key for callers that did not present one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a job. `Running` is the only non-terminal state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// At least one sub-service has not answered yet.
    Running,
    /// Every sub-service answered without error.
    Complete,
    /// Every sub-service resolved and at least one error was recorded.
    CompleteWithError,
}

impl JobStatus {
    /// True for both completion states.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::CompleteWithError => "complete_with_error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a registry record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job the record belongs to.
    pub job_id: JobId,
    /// Lifecycle state at the time of the read.
    pub status: JobStatus,
    /// When the job was registered.
    pub started_at: DateTime<Utc>,
    /// Set exactly when `status` is terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of recorded sub-service errors.
    pub error_count: usize,
    /// Sub-service answers in arrival order.
    pub results: Vec<SubServiceResult>,
}

/// One outbound message of a progress stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// 1-based position of this report within its stream.
    pub sequence: u64,
    /// Job being reported on.
    pub job_id: JobId,
    /// Status at sampling time.
    pub status: JobStatus,
    /// When the job was registered.
    pub started_at: Option<DateTime<Utc>>,
    /// Present on the final report only.
    pub completed_at: Option<DateTime<Utc>>,
    /// Errors recorded so far.
    pub error_count: usize,
    /// Answers received so far.
    pub results: Vec<SubServiceResult>,
    /// Last report of the stream.
    #[serde(rename = "final")]
    pub is_final: bool,
}

impl ProgressReport {
    /// Build report number `sequence`; it is final iff the snapshot is terminal.
    pub fn from_snapshot(sequence: u64, snapshot: JobSnapshot) -> Self {
        let is_final = snapshot.status.is_terminal();
        Self {
            sequence,
            job_id: snapshot.job_id,
            status: snapshot.status,
            started_at: Some(snapshot.started_at),
            completed_at: snapshot.completed_at,
            error_count: snapshot.error_count,
            results: snapshot.results,
            is_final,
        }
    }
}
