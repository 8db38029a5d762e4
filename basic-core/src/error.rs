//! Error types for the registry, the executor, sub-service calls and
//! progress streams.

use thiserror::Error;

use crate::job::JobId;

/// Invariant violations reported by the [`StatusRegistry`](crate::StatusRegistry).
///
/// None of these are expected from a correct caller: job ids are minted fresh
/// per request and the executor finishes each job exactly once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No record exists for the job.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// `start` was called for a job that is still running.
    #[error("Job {0} is already running")]
    AlreadyRunning(JobId),

    /// `start` was called for a job that already finished.
    #[error("Job {0} already reached a terminal state and cannot be restarted")]
    AlreadyRegistered(JobId),

    /// A mutation targeted a job that is already terminal.
    #[error("Job {0} already finished")]
    AlreadyFinished(JobId),
}

/// Failure of a single simulated upstream call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubServiceError {
    /// The upstream answered with an error.
    #[error("{service} ({transport}) transport error: {reason}")]
    Transport {
        /// Descriptor name of the upstream.
        service: String,
        /// Transport the call went over.
        transport: String,
        /// Upstream supplied reason.
        reason: String,
    },

    /// The task running the call panicked or was cancelled.
    #[error("{service} call aborted: {reason}")]
    Aborted {
        /// Descriptor name of the upstream, or `unknown`.
        service: String,
        /// `task panicked` or `task cancelled`.
        reason: String,
    },
}

/// Why a detached executor run did not produce a summary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The merge step hit a registry invariant violation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The executor task itself panicked or was cancelled before finishing.
    #[error("Executor for job {job_id} aborted: {reason}")]
    Aborted {
        /// Job whose executor died.
        job_id: JobId,
        /// `task panicked` or `task cancelled`.
        reason: String,
    },
}

/// Why a progress stream ended early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// The record disappeared between ticks.
    #[error("Job {0} vanished from the registry while streaming")]
    JobNotFound(JobId),

    /// The sink stopped accepting reports.
    #[error("Outbound stream closed: {0}")]
    StreamClosed(String),
}

/// Any failure surfaced by the [`Orchestrator`](crate::Orchestrator).
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Starting or reading a job failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A detached executor run died.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// A progress stream ended without its final report.
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Result alias used by the orchestrator.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
