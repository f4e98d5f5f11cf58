//! Core value types: metrics, connection classes, and path events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single connectivity observation.
///
/// Created once per path event or probe and never mutated afterwards;
/// owned by the history after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetric {
    /// When the observation was made
    pub timestamp: DateTime<Utc>,
    /// Connection type tag ("wifi", "cellular", "wired", "none", "unknown")
    pub connection_type: String,
    /// Round-trip latency in milliseconds (>= 0)
    pub latency_ms: f64,
    /// Packet loss in percent (0..=100)
    pub packet_loss_pct: f64,
}

impl NetworkMetric {
    /// Create a metric, clamping latency and loss into their valid ranges.
    pub fn new(connection_type: impl Into<String>, latency_ms: f64, packet_loss_pct: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            connection_type: connection_type.into(),
            latency_ms: latency_ms.max(0.0),
            packet_loss_pct: packet_loss_pct.clamp(0.0, 100.0),
        }
    }

    /// Numeric encoding of the connection type for model input.
    pub fn connection_code(&self) -> f64 {
        match self.connection_type.as_str() {
            "wifi" => 1.0,
            "cellular" => 2.0,
            "wired" => 3.0,
            "none" => 4.0,
            _ => 0.0,
        }
    }

    /// Feature projection handed to the local inference model:
    /// `[latency_ms, packet_loss_pct, connection_code]`.
    pub fn features(&self) -> FeatureVector {
        FeatureVector([self.latency_ms, self.packet_loss_pct, self.connection_code()])
    }
}

/// Number of features the model sees per metric.
pub const NUM_FEATURES: usize = 3;

/// Feature names, index-aligned with [`NetworkMetric::features`].
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = ["latency_ms", "packet_loss_pct", "connection_code"];

/// Fixed-size feature projection of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; NUM_FEATURES]);

impl FeatureVector {
    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Connection class derived from path events. Exactly one is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionClass {
    /// No path event observed yet
    #[default]
    Unknown,
    Wifi,
    Cellular,
    Wired,
    /// Path reported unsatisfied
    Unavailable,
}

impl ConnectionClass {
    /// A device is reachable iff it has a known usable path.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ConnectionClass::Unknown | ConnectionClass::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionClass::Unknown => "unknown",
            ConnectionClass::Wifi => "wifi",
            ConnectionClass::Cellular => "cellular",
            ConnectionClass::Wired => "wired",
            ConnectionClass::Unavailable => "none",
        }
    }
}

impl std::fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical interface kind reported by a path source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Wifi,
    Wired,
    Cellular,
    Loopback,
    Other,
}

/// A network interface available on the current path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathInterface {
    /// OS interface name (e.g. "en0", "wlan0")
    pub name: String,
    pub kind: InterfaceKind,
}

impl PathInterface {
    pub fn new(name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Whether the path can currently carry traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStatus {
    Satisfied,
    Unsatisfied,
}

/// Notification from a path source that connectivity status or the active
/// interface set changed (or was re-probed).
#[derive(Debug, Clone, PartialEq)]
pub struct PathEvent {
    pub status: PathStatus,
    /// Interfaces in the order the source reports them
    pub interfaces: Vec<PathInterface>,
    /// Measured latency, when the source has one (probe-based sources)
    pub latency_ms: Option<f64>,
    /// Measured packet loss, when the source has one
    pub packet_loss_pct: Option<f64>,
}

impl PathEvent {
    /// A satisfied event over the given interfaces, without measurements.
    pub fn satisfied(interfaces: Vec<PathInterface>) -> Self {
        Self {
            status: PathStatus::Satisfied,
            interfaces,
            latency_ms: None,
            packet_loss_pct: None,
        }
    }

    /// An unsatisfied event (no usable path).
    pub fn unsatisfied() -> Self {
        Self {
            status: PathStatus::Unsatisfied,
            interfaces: Vec::new(),
            latency_ms: None,
            packet_loss_pct: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_packet_loss(mut self, packet_loss_pct: f64) -> Self {
        self.packet_loss_pct = Some(packet_loss_pct);
        self
    }

    /// Map this event to a connection class.
    ///
    /// Satisfied paths pick the best interface in priority order
    /// wifi > wired > cellular; a satisfied path with no recognized
    /// interface still counts as wired (usable but untyped).
    pub fn classify(&self) -> ConnectionClass {
        match self.status {
            PathStatus::Unsatisfied => ConnectionClass::Unavailable,
            PathStatus::Satisfied => {
                for wanted in [InterfaceKind::Wifi, InterfaceKind::Wired, InterfaceKind::Cellular] {
                    if self.interfaces.iter().any(|i| i.kind == wanted) {
                        return match wanted {
                            InterfaceKind::Wifi => ConnectionClass::Wifi,
                            InterfaceKind::Wired => ConnectionClass::Wired,
                            InterfaceKind::Cellular => ConnectionClass::Cellular,
                            _ => unreachable!(),
                        };
                    }
                }
                ConnectionClass::Wired
            }
        }
    }
}
