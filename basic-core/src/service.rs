//! Upstream sub-services the executor fans out to.
//!
//! [`SubService`] is the seam: production wiring uses [`SimulatedSubService`],
//! which models variable-latency upstream calls by sleeping before it answers.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

use crate::error::SubServiceError;

/// Version stamped on every simulated answer.
pub const SUB_SERVICE_VERSION: &str = "v0.1.0";

/// Wire protocol the upstream is reached over. Informational only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// HTTP/JSON.
    Rest,
    /// JSON-RPC.
    Rpc,
    /// gRPC.
    Grpc,
}

impl Transport {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Rest => "rest",
            Transport::Rpc => "rpc",
            Transport::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream a job fans out to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubServiceDescriptor {
    /// Name echoed in results and errors.
    pub name: String,
    /// Transport the upstream speaks.
    pub transport: Transport,
    /// Overrides the simulated random latency when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_latency_ms: Option<u64>,
    /// Forces every call to this upstream to fail.
    #[serde(default)]
    pub induce_failure: bool,
}

impl SubServiceDescriptor {
    /// Descriptor with random latency and no forced failure.
    pub fn new(name: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            transport,
            fixed_latency_ms: None,
            induce_failure: false,
        }
    }

    /// Pin the simulated latency.
    pub fn with_fixed_latency(mut self, latency: Duration) -> Self {
        self.fixed_latency_ms = Some(latency.as_millis() as u64);
        self
    }

    /// Make every call fail.
    pub fn failing(mut self) -> Self {
        self.induce_failure = true;
        self
    }

    /// Pinned latency, if any.
    pub fn fixed_latency(&self) -> Option<Duration> {
        self.fixed_latency_ms.map(Duration::from_millis)
    }

    /// The five upstreams the service fans out to by default.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("service-1", Transport::Rest),
            Self::new("service-2", Transport::Rpc),
            Self::new("service-3", Transport::Grpc),
            Self::new("service-4", Transport::Rest),
            Self::new("service-5", Transport::Grpc),
        ]
    }
}

/// Payload of a sub-service answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubServiceData {
    /// Serialized as `type`; carries the transport name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque upstream value.
    pub value: String,
}

/// Answer of exactly one upstream call. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubServiceResult {
    /// Fresh per answer.
    pub id: Uuid,
    /// Descriptor name of the upstream.
    pub name: String,
    /// Upstream version string.
    pub version: String,
    /// Payload.
    pub data: SubServiceData,
}

impl SubServiceResult {
    /// Canned answer for `descriptor`.
    pub fn for_descriptor(descriptor: &SubServiceDescriptor) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: descriptor.name.clone(),
            version: SUB_SERVICE_VERSION.to_string(),
            data: SubServiceData {
                kind: descriptor.transport.as_str().to_string(),
                value: format!("Some data from {}", descriptor.name),
            },
        }
    }
}

/// An upstream the executor can call.
#[async_trait]
pub trait SubService: Send + Sync + fmt::Debug {
    /// Perform a single attempt against the upstream described by `descriptor`.
    async fn call(
        &self,
        descriptor: &SubServiceDescriptor,
    ) -> Result<SubServiceResult, SubServiceError>;
}

/// Sleeps a bounded pseudo-random duration, then answers.
#[derive(Debug, Clone)]
pub struct SimulatedSubService {
    max_latency: Duration,
    failure_ratio: f64,
}

impl SimulatedSubService {
    /// Calls sleep up to `max_latency` and never fail on their own.
    pub fn new(max_latency: Duration) -> Self {
        Self {
            max_latency,
            failure_ratio: 0.0,
        }
    }

    /// Fail roughly `ratio` of calls with a transport error. Clamped to `[0, 1]`.
    pub fn with_failure_ratio(mut self, ratio: f64) -> Self {
        self.failure_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Ceiling of the random latency.
    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    fn plan(&self, descriptor: &SubServiceDescriptor) -> (Duration, bool) {
        let mut rng = rand::rng();
        let latency = descriptor.fixed_latency().unwrap_or_else(|| {
            let ceiling = self.max_latency.as_millis() as u64;
            Duration::from_millis(rng.random_range(0..=ceiling))
        });
        let fail = descriptor.induce_failure
            || (self.failure_ratio > 0.0 && rng.random_bool(self.failure_ratio));
        (latency, fail)
    }
}

impl Default for SimulatedSubService {
    fn default() -> Self {
        Self::new(Duration::from_secs(9))
    }
}

#[async_trait]
impl SubService for SimulatedSubService {
    async fn call(
        &self,
        descriptor: &SubServiceDescriptor,
    ) -> Result<SubServiceResult, SubServiceError> {
        // ThreadRng is not Send; settle the dice before suspending.
        let (latency, fail) = self.plan(descriptor);
        tokio::time::sleep(latency).await;

        if fail {
            return Err(SubServiceError::Transport {
                service: descriptor.name.clone(),
                transport: descriptor.transport.to_string(),
                reason: format!(
                    "simulated upstream failure after {}ms",
                    latency.as_millis()
                ),
            });
        }

        Ok(SubServiceResult::for_descriptor(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn fixed_latency_overrides_random_delay() {
        let service = SimulatedSubService::new(Duration::from_secs(60));
        let descriptor = SubServiceDescriptor::new("service-1", Transport::Rest)
            .with_fixed_latency(Duration::from_millis(1500));

        let started = Instant::now();
        let result = service.call(&descriptor).await.expect("call succeeds");

        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        assert_eq!(result.name, "service-1");
        assert_eq!(result.version, SUB_SERVICE_VERSION);
        assert_eq!(result.data.kind, "rest");
        assert_eq!(result.data.value, "Some data from service-1");
    }

    #[tokio::test(start_paused = true)]
    async fn random_latency_stays_under_ceiling() {
        let service = SimulatedSubService::new(Duration::from_millis(250));
        let descriptor = SubServiceDescriptor::new("service-2", Transport::Rpc);

        for _ in 0..16 {
            let started = Instant::now();
            service.call(&descriptor).await.expect("call succeeds");
            assert!(started.elapsed() <= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn induced_failure_reports_transport_error() {
        let service = SimulatedSubService::new(Duration::ZERO);
        let descriptor =
            SubServiceDescriptor::new("service-3", Transport::Grpc).failing();

        let err = service.call(&descriptor).await.expect_err("call fails");
        match err {
            SubServiceError::Transport {
                service, transport, ..
            } => {
                assert_eq!(service, "service-3");
                assert_eq!(transport, "grpc");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_failure_ratio_fails_every_call() {
        let service =
            SimulatedSubService::new(Duration::ZERO).with_failure_ratio(7.0);
        let descriptor = SubServiceDescriptor::new("service-4", Transport::Rest);

        for _ in 0..4 {
            assert!(service.call(&descriptor).await.is_err());
        }
    }

    #[test]
    fn descriptors_deserialize_with_optional_fields() {
        let raw = r#"{"name":"service-9","transport":"grpc"}"#;
        let descriptor: SubServiceDescriptor =
            serde_json::from_str(raw).expect("valid descriptor");
        assert_eq!(descriptor.transport, Transport::Grpc);
        assert_eq!(descriptor.fixed_latency(), None);
        assert!(!descriptor.induce_failure);
    }
}
