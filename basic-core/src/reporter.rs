//! Ticker-driven progress stream for one job.
//!
//! The reporter never writes to the registry. It samples a snapshot on every
//! tick, pushes it to a [`ProgressSink`] and stops after the first terminal
//! snapshot, so each stream carries exactly one report with `final = true`.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::ReportError,
    job::{JobId, ProgressReport},
    registry::StatusRegistry,
};

/// Reporting period used when none is configured.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Where a single stream is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReporterState {
    /// Waiting for the first tick.
    AwaitingFirstRun,
    /// At least one tick has fired.
    Streaming,
    /// The final report went out.
    Terminated,
}

/// How a stream ended when it ended cleanly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReporterExit {
    /// The final report was delivered.
    Completed {
        /// Reports delivered, final one included.
        reports: u64,
    },
    /// The caller went away first. Nothing was emitted after cancellation.
    Cancelled {
        /// Reports delivered before cancellation.
        reports: u64,
    },
}

impl ReporterExit {
    /// Reports delivered either way.
    pub fn reports(&self) -> u64 {
        match self {
            ReporterExit::Completed { reports } | ReporterExit::Cancelled { reports } => *reports,
        }
    }
}

/// Outbound half of a progress stream.
#[async_trait]
pub trait ProgressSink: Send {
    /// Deliver one report; an error ends the stream.
    async fn send(&mut self, report: ProgressReport) -> Result<(), ReportError>;
}

#[async_trait]
impl ProgressSink for mpsc::Sender<ProgressReport> {
    async fn send(&mut self, report: ProgressReport) -> Result<(), ReportError> {
        mpsc::Sender::send(self, report)
            .await
            .map_err(|_| ReportError::StreamClosed("receiver dropped".to_string()))
    }
}

/// Samples the registry on a fixed period and pushes reports to a sink.
#[derive(Clone)]
pub struct ProgressReporter {
    registry: Arc<StatusRegistry>,
    interval: Duration,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    /// A zero interval is bumped to one millisecond; tokio rejects zero periods.
    pub fn new(registry: Arc<StatusRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Effective reporting period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stream reports for `job_id` into `sink` until the job is terminal or
    /// `cancel` fires. The first report goes out one interval after entry.
    pub async fn run<S>(
        &self,
        job_id: JobId,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<ReporterExit, ReportError>
    where
        S: ProgressSink + ?Sized,
    {
        let mut state = ReporterState::AwaitingFirstRun;
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0u64;

        debug!(job_id = %job_id, interval_ms = self.interval.as_millis() as u64, "reporter started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(job_id = %job_id, reports = sequence, ?state, "progress stream cancelled");
                    return Ok(ReporterExit::Cancelled { reports: sequence });
                }
                _ = ticker.tick() => {}
            }
            state = ReporterState::Streaming;

            let snapshot = self
                .registry
                .get(job_id)
                .ok_or(ReportError::JobNotFound(job_id))?;

            sequence += 1;
            let report = ProgressReport::from_snapshot(sequence, snapshot);
            let is_final = report.is_final;

            // A send may park on a full channel; cancellation still wins.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(job_id = %job_id, reports = sequence - 1, "progress stream cancelled during send");
                    return Ok(ReporterExit::Cancelled { reports: sequence - 1 });
                }
                sent = sink.send(report) => {
                    if let Err(err) = sent {
                        warn!(job_id = %job_id, error = %err, "progress stream write failed");
                        return Err(err);
                    }
                }
            }

            if is_final {
                state = ReporterState::Terminated;
                info!(job_id = %job_id, reports = sequence, ?state, "progress stream completed");
                return Ok(ReporterExit::Completed { reports: sequence });
            }
        }
    }
}
