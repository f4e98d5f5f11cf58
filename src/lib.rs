//! reachmon: adaptive reachability and anomaly-intelligence engine.
//!
//! Tracks the device's live network-path state from a pluggable
//! [`PathSource`], keeps a bounded rolling [`MetricHistory`] of
//! connectivity metrics, and runs an anomaly pipeline combining a local
//! inference model with registered detector plugins (native or
//! script-backed). Threat predictions over the history are relayed to a
//! remote aggregation endpoint, and a recycle scheduler forces periodic
//! re-probes while the device is unreachable.
//!
//! The entry point is [`ReachabilityEngine`], one instance per monitoring
//! session.

pub mod config;
pub mod engine;
pub mod error;
pub mod federated;
pub mod history;
pub mod model;
pub mod path;
pub mod pipeline;
pub mod plugin;
pub mod recycle;
pub mod types;

pub use config::Config;
pub use engine::{PathObserver, ReachabilityEngine};
pub use error::{EngineError, Result};
pub use federated::{FederatedUpdater, HttpUpdater};
pub use history::MetricHistory;
pub use model::{AnomalyModel, BaselineModel};
pub use path::{PathSource, TcpProbe};
pub use pipeline::{AnomalyObserver, AnomalyPipeline};
pub use plugin::{Detector, HighLossDetector, PluginRegistry, ScriptPlugin};
pub use recycle::RecycleScheduler;
pub use types::{
    ConnectionClass, InterfaceKind, NetworkMetric, PathEvent, PathInterface, PathStatus,
};
