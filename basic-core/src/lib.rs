//! # Basic Core
//!
//! Orchestration core of the basic service: one background job fans out to a
//! fixed set of simulated sub-services, fans their answers back in, and is
//! observed through a ticker-driven progress stream.
//!
//! ## Architecture
//!
//! - [`registry`]: concurrency-safe job status registry, the single source of
//!   truth for "is this job still running"
//! - [`service`]: the [`SubService`] seam and its simulated implementation
//! - [`executor`]: fan-out/fan-in over a `JoinSet`
//! - [`reporter`]: periodic progress reports pushed into a [`ProgressSink`]
//! - [`orchestrator`]: session-aware entry point tying the three together
//!
//! ## Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use basic_core::{
//!     Orchestrator, ProgressReport, SessionKey, SimulatedSubService,
//!     StatusRegistry, SubServiceDescriptor,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run() -> basic_core::Result<()> {
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(StatusRegistry::new()),
//!         Arc::new(SimulatedSubService::default()),
//!         SubServiceDescriptor::defaults(),
//!         Duration::from_secs(2),
//!     );
//!
//!     let ticket = orchestrator.open(SessionKey::generate())?;
//!     let (mut tx, mut rx) = tokio::sync::mpsc::channel::<ProgressReport>(8);
//!     tokio::spawn(async move {
//!         while let Some(report) = rx.recv().await {
//!             println!("{} results so far", report.results.len());
//!         }
//!     });
//!     orchestrator
//!         .stream(&ticket, &mut tx, CancellationToken::new())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod registry;
pub mod reporter;
pub mod service;

pub use error::{
    ExecutorError, OrchestratorError, RegistryError, ReportError, Result,
    SubServiceError,
};
pub use executor::{FanInSummary, FanOutExecutor, JobHandle};
pub use job::{JobId, JobSnapshot, JobStatus, ProgressReport, SessionKey};
pub use orchestrator::{JobTicket, Orchestrator};
pub use registry::StatusRegistry;
pub use reporter::{
    DEFAULT_TICK_INTERVAL, ProgressReporter, ProgressSink, ReporterExit,
    ReporterState,
};
pub use service::{
    SUB_SERVICE_VERSION, SimulatedSubService, SubService, SubServiceData,
    SubServiceDescriptor, SubServiceResult, Transport,
};
