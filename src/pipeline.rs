//! Anomaly detection and threat prediction pipeline.
//!
//! Detection runs the local model first, then every registered plugin in
//! registration order, OR-combining verdicts with short-circuit at the
//! first positive verdict. Detector failures are isolated: a failing plugin
//! contributes no verdict and never aborts the pass. Only an unrecoverable
//! model error propagates.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::{DetectionConfig, ThreatAggregation};
use crate::error::Result;
use crate::federated::FederatedUpdater;
use crate::model::AnomalyModel;
use crate::plugin::PluginRegistry;
use crate::types::NetworkMetric;

/// Callback fired with the aggregated score when it exceeds the threat
/// threshold.
pub type AnomalyObserver = Box<dyn Fn(f64) + Send + Sync>;

pub struct AnomalyPipeline {
    config: DetectionConfig,
    registry: Arc<PluginRegistry>,
    model: RwLock<Option<Arc<dyn AnomalyModel>>>,
    updater: RwLock<Option<Arc<dyn FederatedUpdater>>>,
    on_anomaly: RwLock<Option<AnomalyObserver>>,
}

impl AnomalyPipeline {
    pub fn new(config: DetectionConfig, registry: Arc<PluginRegistry>) -> Self {
        Self {
            config,
            registry,
            model: RwLock::new(None),
            updater: RwLock::new(None),
            on_anomaly: RwLock::new(None),
        }
    }

    /// Install or replace the local inference model.
    pub fn set_model(&self, model: Arc<dyn AnomalyModel>) {
        *self.model.write() = Some(model);
    }

    /// Install or replace the federated updater.
    pub fn set_updater(&self, updater: Arc<dyn FederatedUpdater>) {
        *self.updater.write() = Some(updater);
    }

    /// Register the anomaly observer (single slot).
    pub fn set_anomaly_observer(&self, observer: AnomalyObserver) {
        *self.on_anomaly.write() = Some(observer);
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Judge one metric: local model first, then plugins in registration
    /// order, stopping at the first positive verdict.
    pub async fn is_anomaly_detected(&self, metric: &NetworkMetric) -> Result<bool> {
        let model = self.model.read().clone();
        if let Some(model) = model {
            let prob = model.predict(&metric.features()).await?;
            if prob >= self.config.anomaly_threshold {
                debug!("model flagged sample anomalous (p={:.3})", prob);
                return Ok(true);
            }
        }

        for plugin in self.registry.snapshot() {
            match plugin.detect_anomaly(metric).await {
                Ok(true) => {
                    debug!("detector '{}' flagged sample anomalous", plugin.name());
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("detector '{}' failed, no verdict: {}", plugin.name(), e);
                }
            }
        }

        Ok(false)
    }

    /// Aggregate plugin threat scores over the history.
    ///
    /// `None` when no plugin offers a score.
    pub async fn predict_threat(&self, history: &[NetworkMetric]) -> Option<f64> {
        let mut scores = Vec::new();
        for plugin in self.registry.snapshot() {
            if let Some(score) = plugin.predict_threat(history).await {
                scores.push(score.clamp(0.0, 1.0));
            }
        }
        if scores.is_empty() {
            return None;
        }
        let aggregated = match self.config.aggregation {
            ThreatAggregation::Max => scores.iter().cloned().fold(0.0_f64, f64::max),
            ThreatAggregation::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
        };
        Some(aggregated)
    }

    /// Predict the current threat level and relay the history.
    ///
    /// The updater is invoked unconditionally when configured: submission
    /// is telemetry, not gated on the verdict. Send failures are logged and
    /// treated as "no verdict this round".
    pub async fn predict_and_federate(&self, history: &[NetworkMetric]) {
        let score = self.predict_threat(history).await;

        let updater = self.updater.read().clone();
        if let Some(updater) = updater {
            if let Err(e) = updater.send_update(history).await {
                warn!("federated update failed: {}", e);
            }
        }

        if let Some(score) = score {
            debug!("aggregated threat score: {:.3}", score);
            if score > self.config.threat_threshold {
                if let Some(observer) = &*self.on_anomaly.read() {
                    observer(score);
                }
            }
        }
    }
}
