//! Session-aware entry point for background jobs.
//!
//! [`Orchestrator::open`] starts a job (or attaches to the session's running
//! one), [`Orchestrator::stream`] follows it, and [`Orchestrator::sweep`]
//! evicts finished jobs once their retention window has passed.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::{
    error::Result,
    executor::{FanOutExecutor, JobHandle},
    job::{JobId, JobSnapshot, SessionKey},
    registry::StatusRegistry,
    reporter::{ProgressReporter, ProgressSink, ReporterExit},
    service::{SubService, SubServiceDescriptor},
};

/// What a caller gets back from [`Orchestrator::open`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobTicket {
    /// Job the caller should follow.
    pub job_id: JobId,
    /// Session the job is bound to.
    pub session: SessionKey,
    /// True when the session already had a running job and no new work was started.
    pub attached: bool,
}

/// Entry point for background jobs. Owns the registry and the session table.
pub struct Orchestrator {
    registry: Arc<StatusRegistry>,
    executor: FanOutExecutor,
    reporter: ProgressReporter,
    sessions: Mutex<HashMap<SessionKey, JobId>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sessions = self.sessions.try_lock().map(|guard| guard.len());
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .field("reporter", &self.reporter)
            .field("sessions", &sessions)
            .finish()
    }
}

impl Orchestrator {
    /// Wire an executor and a reporter over a shared registry.
    pub fn new(
        registry: Arc<StatusRegistry>,
        service: Arc<dyn SubService>,
        descriptors: Vec<SubServiceDescriptor>,
        tick_interval: Duration,
    ) -> Self {
        let executor = FanOutExecutor::new(Arc::clone(&registry), service, descriptors);
        let reporter = ProgressReporter::new(Arc::clone(&registry), tick_interval);
        Self {
            registry,
            executor,
            reporter,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Shared job table.
    pub fn registry(&self) -> &Arc<StatusRegistry> {
        &self.registry
    }

    /// Fan-out executor used for new jobs.
    pub fn executor(&self) -> &FanOutExecutor {
        &self.executor
    }

    /// Reporter used by [`stream`](Self::stream).
    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Attach `session` to its running job, or start a new one.
    #[instrument(skip_all, fields(session = %session))]
    pub fn open(&self, session: SessionKey) -> Result<JobTicket> {
        Ok(self.open_with_handle(session)?.0)
    }

    /// Like [`open`](Self::open) but also hands back the executor handle of a
    /// freshly started job. Attaching yields no handle.
    pub fn open_with_handle(
        &self,
        session: SessionKey,
    ) -> Result<(JobTicket, Option<JobHandle>)> {
        // Held across start + spawn so two requests on one session cannot both start work.
        let mut sessions = self.sessions.lock();

        if let Some(&job_id) = sessions.get(&session) {
            let running = self
                .registry
                .get(job_id)
                .is_some_and(|snapshot| !snapshot.status.is_terminal());
            if running {
                info!(job_id = %job_id, "attaching to running job");
                return Ok((
                    JobTicket {
                        job_id,
                        session,
                        attached: true,
                    },
                    None,
                ));
            }
        }

        let job_id = JobId::new();
        self.registry.start(job_id)?;
        let handle = self.executor.spawn(job_id);
        sessions.insert(session.clone(), job_id);
        info!(
            job_id = %job_id,
            services = self.executor.descriptors().len(),
            "background job started"
        );

        Ok((
            JobTicket {
                job_id,
                session,
                attached: false,
            },
            Some(handle),
        ))
    }

    /// Stream progress for `ticket` until the job is terminal or `cancel` fires.
    pub async fn stream<S>(
        &self,
        ticket: &JobTicket,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<ReporterExit>
    where
        S: ProgressSink + ?Sized,
    {
        Ok(self.reporter.run(ticket.job_id, sink, cancel).await?)
    }

    /// Current view of `job_id`, if it is still tracked.
    pub fn snapshot(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.registry.get(job_id)
    }

    /// Ids of running jobs.
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.registry.active_jobs()
    }

    /// Evict terminal jobs older than `retention` and forget sessions that no
    /// longer point at a live record. Returns the number of evicted jobs.
    ///
    /// `retention` is raised to at least two reporting intervals so a stream
    /// that is one tick away from its final report never loses the record.
    pub fn sweep(&self, retention: Duration) -> usize {
        let retention = retention.max(self.min_retention());
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut sessions = self.sessions.lock();
        let evicted = self.registry.evict_finished_before(cutoff);
        sessions.retain(|_, job_id| self.registry.get(*job_id).is_some());

        if evicted > 0 {
            info!(evicted, remaining = self.registry.len(), "retention sweep evicted jobs");
        }
        evicted
    }

    /// Shortest retention [`sweep`](Self::sweep) honours.
    pub fn min_retention(&self) -> Duration {
        self.reporter.interval().saturating_mul(2)
    }
}
