//! Federated update relay.
//!
//! Ships the engine's metric history to a remote aggregation endpoint for
//! cross-device learning. Submission is observational telemetry, not gated
//! on any anomaly verdict, and failures surface to the caller without
//! retry (connectivity retry belongs to the recycle scheduler, not here).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::FederatedConfig;
use crate::error::{EngineError, Result};
use crate::types::NetworkMetric;

/// Transport for federated updates. The engine holds at most one active
/// updater, replaceable between rounds.
#[async_trait]
pub trait FederatedUpdater: Send + Sync {
    /// Relay the history. The data handed to the transport equals the
    /// history handed in.
    async fn send_update(&self, history: &[NetworkMetric]) -> Result<()>;
}

/// Wire payload for the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePayload {
    /// Monitoring-session id, fresh per updater instance
    pub session_id: Uuid,
    pub device_tag: String,
    pub generated_at: DateTime<Utc>,
    pub metrics: Vec<NetworkMetric>,
}

/// POSTs JSON payloads to a configured aggregation endpoint.
#[derive(Debug)]
pub struct HttpUpdater {
    endpoint: String,
    device_tag: String,
    session_id: Uuid,
    client: reqwest::Client,
}

impl HttpUpdater {
    pub fn new(config: &FederatedConfig, device_tag: impl Into<String>) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| EngineError::Config("federated endpoint not configured".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Federated(e.to_string()))?;

        Ok(Self {
            endpoint,
            device_tag: device_tag.into(),
            session_id: Uuid::new_v4(),
            client,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

#[async_trait]
impl FederatedUpdater for HttpUpdater {
    async fn send_update(&self, history: &[NetworkMetric]) -> Result<()> {
        let payload = UpdatePayload {
            session_id: self.session_id,
            device_tag: self.device_tag.clone(),
            generated_at: Utc::now(),
            metrics: history.to_vec(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::Federated(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Federated(format!(
                "endpoint returned {}",
                status
            )));
        }

        debug!(
            "federated update sent: {} samples to {}",
            payload.metrics.len(),
            self.endpoint
        );
        Ok(())
    }
}
