//! Collaborator health checks
//!
//! Probes the embedding provider, the vector index and persistence
//! concurrently, each bounded by the configured probe timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::ConfigReport;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, Service};
use crate::storage::Storage;
use crate::vector::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    /// Any probe failed, including all of them
    Degraded,
}

/// Outcome of one probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: ProbeStatus,
    pub available: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub services: Vec<ServiceHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigReport>,
    /// Vector index collections, verbose only and when the index answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,
}

impl HealthReport {
    pub fn service(&self, service: Service) -> Option<&ServiceHealth> {
        self.services.iter().find(|s| s.service == service.as_str())
    }
}

#[derive(Clone)]
pub struct HealthMonitor {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    storage: Storage,
    report: ConfigReport,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        storage: Storage,
        report: ConfigReport,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            storage,
            report,
            probe_timeout,
        }
    }

    pub async fn check(&self, verbose: bool) -> HealthReport {
        let (embedding, vector, persistence) = futures::join!(
            self.probe(Service::Embedding, self.embedder.health_check()),
            self.probe(Service::VectorIndex, self.index.health_check()),
            self.probe(Service::Persistence, self.storage.ping()),
        );

        let services = vec![embedding, vector, persistence];
        let status = if services.iter().all(|s| s.available) {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };

        let (config, collections) = if verbose {
            let collections = if services[1].available {
                match tokio::time::timeout(self.probe_timeout, self.index.list_collections()).await {
                    Ok(Ok(collections)) => Some(collections),
                    _ => None,
                }
            } else {
                None
            };
            (Some(self.report.clone()), collections)
        } else {
            (None, None)
        };

        HealthReport {
            status,
            services,
            config,
            collections,
        }
    }

    async fn probe<F>(&self, service: Service, probe: F) -> ServiceHealth
    where
        F: Future<Output = Result<()>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, probe).await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("probe timed out after {:?}", self.probe_timeout)),
        };

        if let Some(ref error) = error {
            tracing::warn!(service = %service, error = %error, "health probe failed");
        }

        ServiceHealth {
            service: service.as_str().to_string(),
            status: if error.is_none() {
                ProbeStatus::Healthy
            } else {
                ProbeStatus::Unhealthy
            },
            available: error.is_none(),
            response_time_ms,
            error,
        }
    }
}
