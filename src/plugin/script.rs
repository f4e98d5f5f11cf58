//! Script-backed detector plugins.
//!
//! A script is a WebAssembly text module compiled and run in an embedded
//! wasmtime instance. Modules are instantiated with no imports, so a script
//! sees nothing of the host beyond the metric fields marshalled into its
//! exported functions. Compile and interface errors surface at load time;
//! runtime traps are contained to the failing call.
//!
//! Required export:
//! `detect_anomaly(latency_ms: f64, packet_loss_pct: f64, connection: i32) -> i32`
//! (non-zero = anomalous). Optional export:
//! `predict_threat(sample_count: f64, mean_latency_ms: f64, mean_loss_pct: f64) -> f64`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;
use wasmtime::{Instance, Module, Store, TypedFunc};

use crate::error::{EngineError, Result};
use crate::types::NetworkMetric;

use super::Detector;

/// Export a script must provide.
pub const DETECT_EXPORT: &str = "detect_anomaly";
/// Export a script may provide.
pub const THREAT_EXPORT: &str = "predict_threat";

// One compilation engine for all script plugins; stores stay per-plugin.
static SCRIPT_ENGINE: Lazy<wasmtime::Engine> = Lazy::new(wasmtime::Engine::default);

/// A detector backed by a compiled script module.
pub struct ScriptPlugin {
    name: String,
    store: Mutex<Store<()>>,
    detect: TypedFunc<(f64, f64, i32), i32>,
    threat: Option<TypedFunc<(f64, f64, f64), f64>>,
}

impl std::fmt::Debug for ScriptPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptPlugin")
            .field("name", &self.name)
            .field("has_threat", &self.threat.is_some())
            .finish()
    }
}

impl ScriptPlugin {
    /// Compile `source` (WAT) and resolve its exports.
    ///
    /// Fails synchronously on a malformed module, a module that needs
    /// imports, or a missing/ill-typed `detect_anomaly` export, never at
    /// first invocation.
    pub fn load(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();

        let module = Module::new(&SCRIPT_ENGINE, source).map_err(|e| {
            EngineError::PluginLoad(format!("script '{}' failed to compile: {}", name, e))
        })?;

        let mut store = Store::new(&SCRIPT_ENGINE, ());
        let instance = Instance::new(&mut store, &module, &[]).map_err(|e| {
            EngineError::PluginLoad(format!("script '{}' failed to instantiate: {}", name, e))
        })?;

        let detect = instance
            .get_typed_func::<(f64, f64, i32), i32>(&mut store, DETECT_EXPORT)
            .map_err(|e| {
                EngineError::PluginLoad(format!(
                    "script '{}' has no usable `{}` export: {}",
                    name, DETECT_EXPORT, e
                ))
            })?;

        let threat = instance
            .get_typed_func::<(f64, f64, f64), f64>(&mut store, THREAT_EXPORT)
            .ok();

        Ok(Self {
            name,
            store: Mutex::new(store),
            detect,
            threat,
        })
    }

    pub fn has_threat_export(&self) -> bool {
        self.threat.is_some()
    }
}

#[async_trait]
impl Detector for ScriptPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect_anomaly(&self, metric: &NetworkMetric) -> Result<bool> {
        let mut store = self.store.lock();
        let verdict = self
            .detect
            .call(
                &mut *store,
                (
                    metric.latency_ms,
                    metric.packet_loss_pct,
                    metric.connection_code() as i32,
                ),
            )
            .map_err(|e| EngineError::Plugin {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(verdict != 0)
    }

    async fn predict_threat(&self, history: &[NetworkMetric]) -> Option<f64> {
        let threat = self.threat.as_ref()?;
        if history.is_empty() {
            return None;
        }

        let count = history.len() as f64;
        let mean_latency = history.iter().map(|m| m.latency_ms).sum::<f64>() / count;
        let mean_loss = history.iter().map(|m| m.packet_loss_pct).sum::<f64>() / count;

        let mut store = self.store.lock();
        match threat.call(&mut *store, (count, mean_latency, mean_loss)) {
            Ok(score) if score.is_finite() => Some(score.clamp(0.0, 1.0)),
            Ok(_) => None,
            Err(e) => {
                warn!("script '{}' threat call trapped: {}", self.name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LATENCY_SCRIPT: &str = r#"
        (module
          (func (export "detect_anomaly") (param f64 f64 i32) (result i32)
            (f64.gt (local.get 0) (f64.const 50))))
    "#;

    const THREAT_SCRIPT: &str = r#"
        (module
          (func (export "detect_anomaly") (param f64 f64 i32) (result i32)
            (i32.const 0))
          (func (export "predict_threat") (param f64 f64 f64) (result f64)
            (f64.const 0.6)))
    "#;

    const TRAPPING_SCRIPT: &str = r#"
        (module
          (func (export "detect_anomaly") (param f64 f64 i32) (result i32)
            unreachable))
    "#;

    #[tokio::test]
    async fn test_latency_script_detects() {
        let plugin = ScriptPlugin::load("latency", LATENCY_SCRIPT).unwrap();
        let slow = NetworkMetric::new("wifi", 100.0, 0.0);
        let fast = NetworkMetric::new("wifi", 10.0, 0.0);
        assert!(plugin.detect_anomaly(&slow).await.unwrap());
        assert!(!plugin.detect_anomaly(&fast).await.unwrap());
    }

    #[test]
    fn test_malformed_script_fails_load() {
        let err = ScriptPlugin::load("broken", "(module (func").unwrap_err();
        assert!(matches!(err, EngineError::PluginLoad(_)));
    }

    #[test]
    fn test_missing_export_fails_load() {
        let err = ScriptPlugin::load("empty", "(module)").unwrap_err();
        assert!(matches!(err, EngineError::PluginLoad(_)));
        assert!(err.to_string().contains(DETECT_EXPORT));
    }

    #[test]
    fn test_wrong_signature_fails_load() {
        let source = r#"(module (func (export "detect_anomaly") (result i32) (i32.const 0)))"#;
        let err = ScriptPlugin::load("typed", source).unwrap_err();
        assert!(matches!(err, EngineError::PluginLoad(_)));
    }

    #[tokio::test]
    async fn test_threat_export_is_optional() {
        let without = ScriptPlugin::load("plain", LATENCY_SCRIPT).unwrap();
        assert!(!without.has_threat_export());
        let history = vec![NetworkMetric::new("wifi", 20.0, 1.0)];
        assert!(without.predict_threat(&history).await.is_none());

        let with = ScriptPlugin::load("scored", THREAT_SCRIPT).unwrap();
        assert!(with.has_threat_export());
        let score = with.predict_threat(&history).await.unwrap();
        assert!((score - 0.6).abs() < 1e-9);
        // empty history yields no opinion
        assert!(with.predict_threat(&[]).await.is_none());
    }

    #[tokio::test]
    async fn test_trap_is_contained() {
        let plugin = ScriptPlugin::load("trap", TRAPPING_SCRIPT).unwrap();
        let metric = NetworkMetric::new("wifi", 10.0, 0.0);
        let err = plugin.detect_anomaly(&metric).await.unwrap_err();
        assert!(matches!(err, EngineError::Plugin { .. }));
        // the store survives the trap and later calls still run
        let err2 = plugin.detect_anomaly(&metric).await.unwrap_err();
        assert!(matches!(err2, EngineError::Plugin { .. }));
    }
}
