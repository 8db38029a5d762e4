//! Process-local source of truth for job lifecycles.
//!
//! Every record lives behind a single mutex. A record is only ever observed as
//! a whole (see [`JobSnapshot`]), so a reader cannot see `completed_at` without
//! the terminal status that goes with it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{collections::HashMap, fmt};
use tracing::debug;

use crate::{
    error::RegistryError,
    job::{JobId, JobSnapshot, JobStatus},
    service::SubServiceResult,
};

#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    errors: Vec<String>,
    results: Vec<SubServiceResult>,
}

impl JobRecord {
    fn running(now: DateTime<Utc>) -> Self {
        Self {
            status: JobStatus::Running,
            started_at: now,
            completed_at: None,
            errors: Vec::new(),
            results: Vec::new(),
        }
    }

    fn snapshot(&self, job_id: JobId) -> JobSnapshot {
        JobSnapshot {
            job_id,
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error_count: self.errors.len(),
            results: self.results.clone(),
        }
    }
}

/// Shared job table keyed by [`JobId`].
#[derive(Default)]
pub struct StatusRegistry {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl fmt::Debug for StatusRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self.jobs.try_lock().map(|guard| guard.len());
        f.debug_struct("StatusRegistry")
            .field("tracked_jobs", &tracked)
            .finish()
    }
}

impl StatusRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job_id` as running.
    pub fn start(&self, job_id: JobId) -> Result<DateTime<Utc>, RegistryError> {
        let mut jobs = self.jobs.lock();
        if let Some(existing) = jobs.get(&job_id) {
            return Err(if existing.status.is_terminal() {
                RegistryError::AlreadyRegistered(job_id)
            } else {
                RegistryError::AlreadyRunning(job_id)
            });
        }

        let now = Utc::now();
        jobs.insert(job_id, JobRecord::running(now));
        debug!(job_id = %job_id, "job registered");
        Ok(now)
    }

    /// Move a running job to its terminal state. The outcome depends only on
    /// whether any error was recorded before this call.
    pub fn finish(&self, job_id: JobId) -> Result<JobStatus, RegistryError> {
        let mut jobs = self.jobs.lock();
        let record = Self::running_record(&mut jobs, job_id)?;

        record.status = if record.errors.is_empty() {
            JobStatus::Complete
        } else {
            JobStatus::CompleteWithError
        };
        record.completed_at = Some(Utc::now());
        debug!(job_id = %job_id, status = %record.status, "job finished");
        Ok(record.status)
    }

    /// Append an error message to a running job.
    pub fn record_error(
        &self,
        job_id: JobId,
        error: impl fmt::Display,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.lock();
        let record = Self::running_record(&mut jobs, job_id)?;
        record.errors.push(error.to_string());
        Ok(())
    }

    /// Record the error arm of `outcome`; an `Ok` leaves the record unchanged.
    pub fn record_outcome<T, E: fmt::Display>(
        &self,
        job_id: JobId,
        outcome: &Result<T, E>,
    ) -> Result<(), RegistryError> {
        match outcome {
            Ok(_) => Ok(()),
            Err(err) => self.record_error(job_id, err),
        }
    }

    /// Publish one sub-service answer into the job's aggregate result set.
    pub fn record_result(
        &self,
        job_id: JobId,
        result: SubServiceResult,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.lock();
        let record = Self::running_record(&mut jobs, job_id)?;
        record.results.push(result);
        Ok(())
    }

    /// Consistent copy of the job's record, if it exists.
    pub fn get(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.jobs
            .lock()
            .get(&job_id)
            .map(|record| record.snapshot(job_id))
    }

    /// True when any error was recorded; false for unknown jobs.
    pub fn has_errors(&self, job_id: JobId) -> bool {
        self.jobs
            .lock()
            .get(&job_id)
            .map(|record| !record.errors.is_empty())
            .unwrap_or(false)
    }

    /// All error messages recorded for `job_id`, empty when there are none.
    pub fn errors(&self, job_id: JobId) -> Vec<String> {
        self.jobs
            .lock()
            .get(&job_id)
            .map(|record| record.errors.clone())
            .unwrap_or_default()
    }

    /// Ids of every job that is still running.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.jobs
            .lock()
            .iter()
            .filter(|(_, record)| !record.status.is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drop a terminal record. Running jobs are never evicted.
    pub fn evict(&self, job_id: JobId) -> Result<JobSnapshot, RegistryError> {
        let mut jobs = self.jobs.lock();
        let terminal = jobs
            .get(&job_id)
            .map(|record| record.status.is_terminal())
            .ok_or(RegistryError::NotFound(job_id))?;
        if !terminal {
            return Err(RegistryError::AlreadyRunning(job_id));
        }

        jobs.remove(&job_id)
            .map(|record| record.snapshot(job_id))
            .ok_or(RegistryError::NotFound(job_id))
    }

    /// Drop every terminal record completed before `cutoff`.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, record| match record.completed_at {
            Some(completed_at) => completed_at >= cutoff,
            None => true,
        });
        before - jobs.len()
    }

    /// Number of tracked jobs, running or terminal.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// True when no job is tracked.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    fn running_record(
        jobs: &mut HashMap<JobId, JobRecord>,
        job_id: JobId,
    ) -> Result<&mut JobRecord, RegistryError> {
        let record = jobs
            .get_mut(&job_id)
            .ok_or(RegistryError::NotFound(job_id))?;
        if record.status.is_terminal() {
            return Err(RegistryError::AlreadyFinished(job_id));
        }
        Ok(record)
    }
}
