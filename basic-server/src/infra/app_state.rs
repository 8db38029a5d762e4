use std::{fmt, sync::Arc};

use basic_core::{Orchestrator, SimulatedSubService, StatusRegistry};

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the registry, simulated upstreams and orchestrator from `config`.
    pub fn from_config(config: Arc<Config>) -> Self {
        let background = &config.background;
        let service = SimulatedSubService::new(background.max_latency())
            .with_failure_ratio(background.failure_ratio);
        let orchestrator = Orchestrator::new(
            Arc::new(StatusRegistry::new()),
            Arc::new(service),
            background.services.clone(),
            background.tick_interval(),
        );

        Self {
            config,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}
