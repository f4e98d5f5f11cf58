//! Detector plugins and their registry.
//!
//! Detectors are polymorphic: native Rust implementations and
//! script-backed ones (see [`script`]) share one capability trait. The
//! registry preserves registration order; the pipeline evaluates plugins
//! in the order they were added.

pub mod script;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::types::NetworkMetric;

pub use script::ScriptPlugin;

/// A detector judges a single metric anomalous or not, and may score the
/// full history as a threat.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable identifier used in logs
    fn name(&self) -> &str;

    /// Judge one metric. A failure here is isolated by the pipeline and
    /// treated as "no verdict" for this detector only.
    async fn detect_anomaly(&self, metric: &NetworkMetric) -> Result<bool>;

    /// Score the history in `[0, 1]`, or `None` when this detector has no
    /// opinion.
    async fn predict_threat(&self, history: &[NetworkMetric]) -> Option<f64>;
}

/// Ordered set of registered detectors.
///
/// Reads snapshot the list under a short lock, so a detection pass never
/// observes a partially registered plugin and `add` may race with in-flight
/// detection.
pub struct PluginRegistry {
    plugins: RwLock<Vec<Arc<dyn Detector>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
        }
    }

    /// Append a detector. Registration order is significant.
    pub fn add(&self, detector: Arc<dyn Detector>) {
        info!("registering detector plugin: {}", detector.name());
        self.plugins.write().push(detector);
    }

    /// Compile and register a script-backed detector.
    pub fn load_script(&self, name: impl Into<String>, source: &str) -> Result<()> {
        let plugin = ScriptPlugin::load(name, source)?;
        self.add(Arc::new(plugin));
        Ok(())
    }

    /// Load every `*.wat` script in a directory, collecting per-file errors
    /// without aborting the rest.
    pub fn load_from_dir(&self, dir: impl AsRef<Path>) -> Vec<EngineError> {
        let dir = dir.as_ref();
        let mut errors = Vec::new();

        if !dir.exists() {
            warn!("plugin directory does not exist: {}", dir.display());
            return errors;
        }

        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    if path.extension().map(|e| e == "wat").unwrap_or(false) {
                        let name = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or("script")
                            .to_string();
                        let result = std::fs::read_to_string(&path)
                            .map_err(EngineError::Io)
                            .and_then(|source| self.load_script(name.as_str(), &source));
                        if let Err(e) = result {
                            warn!("failed to load plugin {}: {}", path.display(), e);
                            errors.push(e);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("failed to read plugin directory {}: {}", dir.display(), e);
                errors.push(EngineError::Io(e));
            }
        }

        errors
    }

    /// Current detectors, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Detector>> {
        self.plugins.read().clone()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.read().iter().map(|p| p.name().to_string()).collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in detector that flags samples whose packet loss exceeds a fixed
/// threshold, regardless of what the model thinks.
pub struct HighLossDetector {
    threshold_pct: f64,
}

impl HighLossDetector {
    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct }
    }
}

#[async_trait]
impl Detector for HighLossDetector {
    fn name(&self) -> &str {
        "high_loss"
    }

    async fn detect_anomaly(&self, metric: &NetworkMetric) -> Result<bool> {
        Ok(metric.packet_loss_pct > self.threshold_pct)
    }

    async fn predict_threat(&self, history: &[NetworkMetric]) -> Option<f64> {
        if history.is_empty() {
            return None;
        }
        let over = history
            .iter()
            .filter(|m| m.packet_loss_pct > self.threshold_pct)
            .count();
        Some(over as f64 / history.len() as f64)
    }
}
