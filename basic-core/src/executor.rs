//! Fan-out/fan-in over the configured sub-services.
//!
//! One task per descriptor runs on a [`JoinSet`]; the merge loop publishes each
//! answer into the registry as it arrives and finishes the job once every task
//! has resolved, whether it produced a result, an error or a panic.

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::{
    error::{ExecutorError, RegistryError, SubServiceError},
    job::{JobId, JobStatus},
    registry::StatusRegistry,
    service::{SubService, SubServiceDescriptor, SubServiceResult},
};

/// What the merge step observed for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct FanInSummary {
    /// Job the summary belongs to.
    pub job_id: JobId,
    /// Terminal status the registry settled on.
    pub status: JobStatus,
    /// Units that produced a result.
    pub succeeded: usize,
    /// Units that failed, panicked or were cancelled.
    pub failed: usize,
    /// Arrival order, not descriptor order.
    pub results: Vec<SubServiceResult>,
}

/// Handle to a detached executor run. Dropping it does not cancel the job.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    inner: JoinHandle<Result<FanInSummary, RegistryError>>,
}

impl JobHandle {
    /// Job this run belongs to.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// True once the merge step has returned.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the merge step to finish the job.
    pub async fn wait(self) -> Result<FanInSummary, ExecutorError> {
        match self.inner.await {
            Ok(outcome) => Ok(outcome?),
            Err(err) => {
                error!(job_id = %self.job_id, error = %err, "executor task died");
                Err(ExecutorError::Aborted {
                    job_id: self.job_id,
                    reason: join_failure_reason(&err).to_string(),
                })
            }
        }
    }
}

/// Runs one job's fan-out against a fixed descriptor list.
#[derive(Clone)]
pub struct FanOutExecutor {
    registry: Arc<StatusRegistry>,
    service: Arc<dyn SubService>,
    descriptors: Arc<[SubServiceDescriptor]>,
}

impl fmt::Debug for FanOutExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutExecutor")
            .field("service", &self.service)
            .field("descriptors", &self.descriptors.len())
            .finish_non_exhaustive()
    }
}

impl FanOutExecutor {
    /// Executor that calls `service` once per descriptor for every job.
    pub fn new(
        registry: Arc<StatusRegistry>,
        service: Arc<dyn SubService>,
        descriptors: Vec<SubServiceDescriptor>,
    ) -> Self {
        Self {
            registry,
            service,
            descriptors: descriptors.into(),
        }
    }

    /// Upstreams each job fans out to.
    pub fn descriptors(&self) -> &[SubServiceDescriptor] {
        &self.descriptors
    }

    /// Launch the fan-out for a job that is already registered as running.
    pub fn spawn(&self, job_id: JobId) -> JobHandle {
        let executor = self.clone();
        let inner = tokio::spawn(async move { executor.run(job_id).await });
        JobHandle { job_id, inner }
    }

    /// Fan out, merge, and finish `job_id`. Runs to completion on the caller's task.
    pub async fn run(&self, job_id: JobId) -> Result<FanInSummary, RegistryError> {
        let mut units = JoinSet::new();
        let mut unit_names: HashMap<task::Id, String> =
            HashMap::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors.iter().cloned() {
            let service = Arc::clone(&self.service);
            let name = descriptor.name.clone();
            let handle =
                units.spawn(async move { service.call(&descriptor).await });
            unit_names.insert(handle.id(), name);
        }

        let mut results = Vec::with_capacity(self.descriptors.len());
        let mut failed = 0usize;

        while let Some(joined) = units.join_next_with_id().await {
            match Self::settle(joined, &mut unit_names) {
                Ok(result) => {
                    info!(
                        job_id = %job_id,
                        service = %result.name,
                        "received sub-service response"
                    );
                    self.registry.record_result(job_id, result.clone())?;
                    results.push(result);
                }
                Err(err) => {
                    warn!(job_id = %job_id, error = %err, "sub-service call failed");
                    failed += 1;
                    self.registry.record_error(job_id, &err)?;
                }
            }
        }

        let status = self.registry.finish(job_id)?;
        info!(
            job_id = %job_id,
            status = %status,
            succeeded = results.len(),
            failed,
            "fan-in complete"
        );

        Ok(FanInSummary {
            job_id,
            status,
            succeeded: results.len(),
            failed,
            results,
        })
    }

    fn settle(
        joined: Result<
            (task::Id, Result<SubServiceResult, SubServiceError>),
            JoinError,
        >,
        unit_names: &mut HashMap<task::Id, String>,
    ) -> Result<SubServiceResult, SubServiceError> {
        match joined {
            Ok((id, outcome)) => {
                unit_names.remove(&id);
                outcome
            }
            Err(join_err) => Err(SubServiceError::Aborted {
                service: unit_names
                    .remove(&join_err.id())
                    .unwrap_or_else(|| "unknown".to_string()),
                reason: join_failure_reason(&join_err).to_string(),
            }),
        }
    }
}

fn join_failure_reason(err: &JoinError) -> &'static str {
    if err.is_panic() {
        "task panicked"
    } else {
        "task cancelled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Transport;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Answers after the descriptor's fixed latency; panics for names starting with "panic".
    #[derive(Debug)]
    struct ScriptedService;

    #[async_trait]
    impl SubService for ScriptedService {
        async fn call(
            &self,
            descriptor: &SubServiceDescriptor,
        ) -> Result<SubServiceResult, SubServiceError> {
            if let Some(latency) = descriptor.fixed_latency() {
                tokio::time::sleep(latency).await;
            }
            if descriptor.name.starts_with("panic") {
                panic!("scripted panic for {}", descriptor.name);
            }
            if descriptor.induce_failure {
                return Err(SubServiceError::Transport {
                    service: descriptor.name.clone(),
                    transport: descriptor.transport.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(SubServiceResult::for_descriptor(descriptor))
        }
    }

    fn executor(
        registry: &Arc<StatusRegistry>,
        descriptors: Vec<SubServiceDescriptor>,
    ) -> FanOutExecutor {
        FanOutExecutor::new(Arc::clone(registry), Arc::new(ScriptedService), descriptors)
    }

    fn after(name: &str, millis: u64) -> SubServiceDescriptor {
        SubServiceDescriptor::new(name, Transport::Rest)
            .with_fixed_latency(Duration::from_millis(millis))
    }

    #[tokio::test(start_paused = true)]
    async fn zero_descriptors_finish_immediately() {
        let registry = Arc::new(StatusRegistry::new());
        let id = JobId::new();
        registry.start(id).expect("start");

        let summary = executor(&registry, vec![]).run(id).await.expect("run");

        assert_eq!(summary.status, JobStatus::Complete);
        assert!(summary.results.is_empty());
        assert_eq!(summary.failed, 0);
        assert!(registry.get(id).expect("registered").completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn results_merge_in_arrival_order() {
        let registry = Arc::new(StatusRegistry::new());
        let id = JobId::new();
        registry.start(id).expect("start");

        let descriptors = vec![after("slow", 300), after("fast", 100), after("medium", 200)];
        let summary = executor(&registry, descriptors).run(id).await.expect("run");

        let names: Vec<&str> = summary.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["fast", "medium", "slow"]);
        assert_eq!(summary.status, JobStatus::Complete);
        assert_eq!(registry.get(id).expect("registered").results, summary.results);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_recorded_and_do_not_block_completion() {
        let registry = Arc::new(StatusRegistry::new());
        let id = JobId::new();
        registry.start(id).expect("start");

        let descriptors = vec![
            after("service-1", 50),
            after("service-2", 10).failing(),
            after("service-3", 500),
            after("panic-4", 20),
        ];
        let summary = executor(&registry, descriptors).run(id).await.expect("run");

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.status, JobStatus::CompleteWithError);

        let snapshot = registry.get(id).expect("registered");
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(snapshot.results.len(), 2);
        assert!(
            registry
                .errors(id)
                .iter()
                .any(|message| message.contains("connection refused"))
        );
        assert!(
            registry
                .errors(id)
                .iter()
                .any(|message| message.starts_with("panic-4 call aborted"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn finish_waits_for_the_slowest_unit() {
        let registry = Arc::new(StatusRegistry::new());
        let id = JobId::new();
        registry.start(id).expect("start");

        let handle = executor(&registry, vec![after("quick", 10), after("late", 1_000)])
            .spawn(id);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let midway = registry.get(id).expect("registered");
        assert_eq!(midway.status, JobStatus::Running);
        assert_eq!(midway.results.len(), 1);
        assert!(!handle.is_finished());

        let summary = handle.wait().await.expect("run");
        assert_eq!(summary.succeeded, 2);
        assert_eq!(
            registry.get(id).expect("registered").status,
            JobStatus::Complete
        );
    }

    #[tokio::test(start_paused = true)]
    async fn running_an_unregistered_job_is_an_invariant_violation() {
        let registry = Arc::new(StatusRegistry::new());
        let id = JobId::new();

        let outcome = executor(&registry, vec![after("service-1", 0)]).run(id).await;

        assert_eq!(outcome, Err(RegistryError::NotFound(id)));
        assert!(registry.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_executor_task_is_reported_as_aborted() {
        let id = JobId::new();
        let panicked = JobHandle {
            job_id: id,
            inner: tokio::spawn(async { panic!("merge step blew up") }),
        };
        assert_eq!(
            panicked.wait().await,
            Err(ExecutorError::Aborted {
                job_id: id,
                reason: "task panicked".to_string(),
            })
        );

        let inner = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(RegistryError::NotFound(JobId::new()))
        });
        inner.abort();
        let cancelled = JobHandle { job_id: id, inner };
        assert_eq!(
            cancelled.wait().await,
            Err(ExecutorError::Aborted {
                job_id: id,
                reason: "task cancelled".to_string(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn registry_violation_passes_through_wait() {
        let registry = Arc::new(StatusRegistry::new());
        let id = JobId::new();

        let outcome = executor(&registry, vec![]).spawn(id).wait().await;

        assert_eq!(outcome, Err(ExecutorError::Registry(RegistryError::NotFound(id))));
    }
}
