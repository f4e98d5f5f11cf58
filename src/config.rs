use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub recycle: RecycleConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub federated: FederatedConfig,

    #[serde(default)]
    pub plugins: PluginConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from the given path, or fall back to defaults when no
    /// path is given.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) if p.as_ref().exists() => Self::load(p),
            Some(p) => anyhow::bail!("Config file not found: {}", p.as_ref().display()),
            None => Ok(Self::default()),
        }
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Device tag included in federated payloads
    #[serde(default = "default_device_tag")]
    pub device_tag: String,
}

fn default_device_tag() -> String {
    "reachmon".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_tag: default_device_tag(),
        }
    }
}

/// Metric history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum samples retained; oldest is evicted first
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

fn default_max_samples() -> usize {
    100
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
        }
    }
}

/// How threat scores from multiple detectors are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreatAggregation {
    /// Most severe detector wins
    #[default]
    Max,
    /// Average of all non-null scores
    Mean,
}

/// Anomaly detection and threat prediction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Model probability at or above which a sample is anomalous
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    /// Aggregated threat score above which the anomaly observer fires
    #[serde(default = "default_threat_threshold")]
    pub threat_threshold: f64,

    #[serde(default)]
    pub aggregation: ThreatAggregation,

    /// Latency considered nominal by the built-in model (milliseconds)
    #[serde(default = "default_nominal_latency_ms")]
    pub nominal_latency_ms: f64,

    /// Packet loss considered nominal by the built-in model (percent)
    #[serde(default = "default_nominal_loss_pct")]
    pub nominal_loss_pct: f64,
}

fn default_anomaly_threshold() -> f64 {
    0.5
}

fn default_threat_threshold() -> f64 {
    0.5
}

fn default_nominal_latency_ms() -> f64 {
    50.0
}

fn default_nominal_loss_pct() -> f64 {
    10.0
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: default_anomaly_threshold(),
            threat_threshold: default_threat_threshold(),
            aggregation: ThreatAggregation::default(),
            nominal_latency_ms: default_nominal_latency_ms(),
            nominal_loss_pct: default_nominal_loss_pct(),
        }
    }
}

/// Re-probe scheduling while the device is unreachable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecycleConfig {
    /// First retry delay in seconds
    #[serde(default = "default_initial_interval")]
    pub initial_interval_secs: u64,

    /// Upper bound for the backoff delay in seconds
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,

    /// Delay growth factor per attempt (1.0 = fixed interval)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_interval() -> u64 {
    5
}

fn default_max_interval() -> u64 {
    60
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RecycleConfig {
    fn default() -> Self {
        Self {
            initial_interval_secs: default_initial_interval(),
            max_interval_secs: default_max_interval(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// TCP connectivity probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Endpoint the probe connects to
    #[serde(default = "default_probe_target")]
    pub target: String,

    /// Connect timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between background probes while monitoring
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Latency assumed for events without a measurement (milliseconds)
    #[serde(default)]
    pub default_latency_ms: f64,

    /// Packet loss assumed for events without a measurement (percent)
    #[serde(default)]
    pub default_loss_pct: f64,
}

fn default_probe_target() -> String {
    "1.1.1.1:443".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_probe_interval() -> u64 {
    15
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: default_probe_target(),
            timeout_ms: default_probe_timeout_ms(),
            interval_secs: default_probe_interval(),
            default_latency_ms: 0.0,
            default_loss_pct: 0.0,
        }
    }
}

/// Federated update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Aggregation endpoint URL
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_federated_timeout")]
    pub timeout_secs: u64,

    /// Seconds between periodic predict-and-federate rounds (0 = disabled)
    #[serde(default = "default_federated_interval")]
    pub interval_secs: u64,
}

fn default_federated_timeout() -> u64 {
    10
}

fn default_federated_interval() -> u64 {
    60
}

impl Default for FederatedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            timeout_secs: default_federated_timeout(),
            interval_secs: default_federated_interval(),
        }
    }
}

/// Script plugin loading
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directory scanned for `*.wat` detector scripts at startup
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.history.max_samples, 100);
        assert_eq!(config.detection.anomaly_threshold, 0.5);
        assert_eq!(config.detection.aggregation, ThreatAggregation::Max);
        assert_eq!(config.recycle.initial_interval_secs, 5);
        assert!(!config.federated.enabled);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = config.to_toml().unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.history.max_samples, config.history.max_samples);
        assert_eq!(back.probe.target, config.probe.target);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let config: Config = toml::from_str(
            r#"
            [history]
            max_samples = 7

            [detection]
            aggregation = "mean"
            "#,
        )
        .unwrap();
        assert_eq!(config.history.max_samples, 7);
        assert_eq!(config.detection.aggregation, ThreatAggregation::Mean);
        // untouched sections keep defaults
        assert_eq!(config.recycle.max_interval_secs, 60);
        assert_eq!(config.probe.timeout_ms, 3000);
    }
}
