use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::infra::app_state::AppState;

#[async_trait]
pub trait StartupHooks: Send + Sync {
    async fn run(&self, state: &AppState, shutdown: CancellationToken) -> Result<()>;
}

/// Spawns the retention sweeper that evicts finished jobs.
#[derive(Debug, Default)]
pub struct ProdStartupHooks;

#[async_trait]
impl StartupHooks for ProdStartupHooks {
    async fn run(&self, state: &AppState, shutdown: CancellationToken) -> Result<()> {
        let orchestrator = Arc::clone(state.orchestrator());
        let retention = state.config().background.retention();
        let period = state.config().background.sweep_interval();

        info!(
            retention_secs = retention.as_secs(),
            sweep_interval_secs = period.as_secs(),
            "starting job retention sweeper"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("retention sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        orchestrator.sweep(retention);
                    }
                }
            }
        });

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopStartupHooks;

#[async_trait]
impl StartupHooks for NoopStartupHooks {
    async fn run(&self, _state: &AppState, _shutdown: CancellationToken) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::{BackgroundConfig, Config};
    use basic_core::SessionKey;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_finished_jobs_and_stops_on_shutdown() {
        let config = Config {
            background: BackgroundConfig {
                services: vec![],
                tick_interval_ms: 1,
                retention_secs: 0,
                sweep_interval_secs: 1,
                ..BackgroundConfig::default()
            },
            ..Config::default()
        };
        let state = AppState::from_config(Arc::new(config));
        let (ticket, handle) = state
            .orchestrator()
            .open_with_handle(SessionKey::new("sweep"))
            .expect("open");
        handle.expect("fresh job").wait().await.expect("run");
        // Completion must fall before the wall-clock cutoff of two ticks.
        std::thread::sleep(Duration::from_millis(10));

        let shutdown = CancellationToken::new();
        ProdStartupHooks
            .run(&state, shutdown.clone())
            .await
            .expect("hooks");

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(state.orchestrator().snapshot(ticket.job_id).is_none());

        shutdown.cancel();
        tokio::task::yield_now().await;
    }
}
