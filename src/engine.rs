//! Reachability engine: the per-session monitoring context.
//!
//! # Architecture
//! ```text
//! ┌────────────┐  path events   ┌──────────────┐  metrics   ┌───────────────┐
//! │ PathSource │───(mpsc)──────▶│  event task  │───────────▶│ MetricHistory │
//! └────────────┘                │ (sole state  │            └───────────────┘
//!       ▲                       │   mutator)   │── change callback
//!       │ re-probe              └──────┬───────┘
//! ┌─────┴─────────┐   arm/disarm       │
//! │ RecycleSched. │◀───────────────────┘
//! └───────────────┘
//!
//! ┌───────────────────────────────┐     ┌──────────────────┐
//! │ AnomalyPipeline               │────▶│ FederatedUpdater │
//! │ (model + plugins, on demand   │     └──────────────────┘
//! │  and on the federate timer)   │── anomaly callback
//! └───────────────────────────────┘
//! ```
//!
//! All state mutation (connection class, history) happens on the single
//! event task, so metrics land in history in event-observation order.
//! Reads are lock-protected snapshots and never fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::federated::FederatedUpdater;
use crate::history::MetricHistory;
use crate::model::AnomalyModel;
use crate::path::PathSource;
use crate::pipeline::{AnomalyObserver, AnomalyPipeline};
use crate::plugin::{Detector, PluginRegistry};
use crate::recycle::RecycleScheduler;
use crate::types::{ConnectionClass, NetworkMetric, PathEvent};

/// Callback fired with the synthesized metric on every processed path event.
pub type PathObserver = Box<dyn Fn(&NetworkMetric) + Send + Sync>;

/// State shared between the engine handle and its background tasks.
struct EngineShared {
    current: RwLock<ConnectionClass>,
    history: RwLock<MetricHistory>,
    running: AtomicBool,
    on_change: RwLock<Option<PathObserver>>,
    default_latency_ms: f64,
    default_loss_pct: f64,
}

impl EngineShared {
    /// Process one path event. Runs only on the event task.
    ///
    /// Repeated identical events are not suppressed: every event appends a
    /// metric and fires the change callback.
    fn handle_event(&self, event: PathEvent, recycle: &RecycleScheduler) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let class = event.classify();
        let previous = {
            let mut current = self.current.write();
            std::mem::replace(&mut *current, class)
        };
        if previous != class {
            info!("connection changed: {} -> {}", previous, class);
        } else {
            debug!("path update: {} (class unchanged)", class);
        }

        let loss_default = if class == ConnectionClass::Unavailable {
            100.0
        } else {
            self.default_loss_pct
        };
        let metric = NetworkMetric::new(
            class.as_str(),
            event.latency_ms.unwrap_or(self.default_latency_ms),
            event.packet_loss_pct.unwrap_or(loss_default),
        );

        self.history.write().push(metric.clone());

        if let Some(observer) = &*self.on_change.read() {
            observer(&metric);
        }

        if class == ConnectionClass::Unavailable {
            recycle.arm();
        } else {
            recycle.disarm();
        }
    }
}

/// Process-wide monitoring context, one per session: construct, configure,
/// `start_monitoring`, and `stop_monitoring` tears every background task
/// down before returning.
pub struct ReachabilityEngine {
    shared: Arc<EngineShared>,
    pipeline: Arc<AnomalyPipeline>,
    recycle: Arc<RecycleScheduler>,
    source: Arc<dyn PathSource>,
    federated_interval: Duration,
    event_task: Option<JoinHandle<()>>,
    federate_task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ReachabilityEngine {
    pub fn new(config: &Config, source: Arc<dyn PathSource>) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let pipeline = Arc::new(AnomalyPipeline::new(config.detection.clone(), registry));
        let recycle = Arc::new(RecycleScheduler::new(config.recycle.clone(), source.clone()));
        let shared = Arc::new(EngineShared {
            current: RwLock::new(ConnectionClass::Unknown),
            history: RwLock::new(MetricHistory::new(config.history.max_samples)),
            running: AtomicBool::new(false),
            on_change: RwLock::new(None),
            default_latency_ms: config.probe.default_latency_ms,
            default_loss_pct: config.probe.default_loss_pct,
        });

        Self {
            shared,
            pipeline,
            recycle,
            source,
            federated_interval: Duration::from_secs(config.federated.interval_secs),
            event_task: None,
            federate_task: None,
            shutdown_tx: None,
        }
    }

    // ---- reads (never fail; last known state) ----

    pub fn current_connection(&self) -> ConnectionClass {
        *self.shared.current.read()
    }

    pub fn is_reachable(&self) -> bool {
        self.current_connection().is_reachable()
    }

    /// Snapshot of the metric history, oldest first.
    pub fn history(&self) -> Vec<NetworkMetric> {
        self.shared.history.read().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn recycle_armed(&self) -> bool {
        self.recycle.is_armed()
    }

    /// Re-probe attempts performed by the recycle scheduler.
    pub fn recycle_checks(&self) -> u64 {
        self.recycle.checks()
    }

    // ---- configuration ----

    /// Append a detector; registration order is evaluation order.
    pub fn add_plugin(&self, detector: Arc<dyn Detector>) {
        self.pipeline.registry().add(detector);
    }

    /// Compile and register a script-backed detector. Fails synchronously
    /// on a malformed script.
    pub fn load_script_plugin(&self, name: impl Into<String>, source: &str) -> Result<()> {
        self.pipeline.registry().load_script(name, source)
    }

    pub fn set_model(&self, model: Arc<dyn AnomalyModel>) {
        self.pipeline.set_model(model);
    }

    pub fn set_updater(&self, updater: Arc<dyn FederatedUpdater>) {
        self.pipeline.set_updater(updater);
    }

    /// Register the path-change observer (single slot).
    pub fn on_path_change(&self, observer: PathObserver) {
        *self.shared.on_change.write() = Some(observer);
    }

    /// Register the anomaly observer (single slot).
    pub fn on_anomaly(&self, observer: AnomalyObserver) {
        self.pipeline.set_anomaly_observer(observer);
    }

    pub fn plugin_registry(&self) -> &Arc<PluginRegistry> {
        self.pipeline.registry()
    }

    // ---- lifecycle ----

    /// Start the path subscription and background tasks.
    ///
    /// Fails if monitoring is already running or the path source cannot
    /// initialize.
    pub async fn start_monitoring(&mut self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }

        let (event_tx, mut event_rx) = mpsc::channel::<PathEvent>(64);
        if let Err(e) = self.source.start(event_tx) {
            self.shared.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let shared = self.shared.clone();
        let recycle = self.recycle.clone();
        self.event_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_event = event_rx.recv() => match maybe_event {
                        Some(event) => shared.handle_event(event, &recycle),
                        None => break,
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("path event task stopped");
        }));

        if !self.federated_interval.is_zero() {
            let shared = self.shared.clone();
            let pipeline = self.pipeline.clone();
            let period = self.federated_interval;
            self.federate_task = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // the first tick fires immediately; rounds start one period in
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !shared.running.load(Ordering::SeqCst) {
                        break;
                    }
                    let history = shared.history.read().snapshot();
                    pipeline.predict_and_federate(&history).await;
                }
            }));
        }

        info!("monitoring started");
        Ok(())
    }

    /// Stop monitoring: cancel the path subscription, disarm the recycle
    /// scheduler, and tear down background tasks. In-flight detection calls
    /// complete; no event processed after this appends to history or fires
    /// callbacks. Stopping twice is a no-op.
    pub async fn stop_monitoring(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.source.cancel();
        self.recycle.disarm();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.event_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.federate_task.take() {
            task.abort();
        }

        info!("monitoring stopped");
    }

    // ---- detection operations ----

    /// Judge one metric with the full pipeline. Fails only on an
    /// unrecoverable model error.
    pub async fn is_anomaly_detected(&self, metric: &NetworkMetric) -> Result<bool> {
        self.pipeline.is_anomaly_detected(metric).await
    }

    /// Predict the current threat level over the history, relay it to the
    /// configured updater, and fire the anomaly observer if warranted.
    pub async fn predict_and_federate(&self) {
        let history = self.history();
        self.pipeline.predict_and_federate(&history).await;
    }

    /// Force one connectivity re-probe. Fails only if the underlying probe
    /// mechanism fails.
    pub async fn recycle_check(&self) -> Result<()> {
        self.recycle.check().await
    }
}

impl Drop for ReachabilityEngine {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.source.cancel();
        self.recycle.disarm();
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        if let Some(task) = self.federate_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InterfaceKind, PathInterface};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    /// Test source: the test pushes events through the handed-out sender.
    struct ManualSource {
        tx: RwLock<Option<mpsc::Sender<PathEvent>>>,
        probes: AtomicU64,
        fail_start: bool,
    }

    impl ManualSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                tx: RwLock::new(None),
                probes: AtomicU64::new(0),
                fail_start: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                tx: RwLock::new(None),
                probes: AtomicU64::new(0),
                fail_start: true,
            })
        }

        fn sender(&self) -> mpsc::Sender<PathEvent> {
            self.tx.read().clone().expect("source not started")
        }

        async fn emit(&self, event: PathEvent) {
            self.sender().send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl PathSource for ManualSource {
        fn start(&self, events: mpsc::Sender<PathEvent>) -> Result<()> {
            if self.fail_start {
                return Err(EngineError::PathSource("simulated init failure".to_string()));
            }
            *self.tx.write() = Some(events);
            Ok(())
        }

        fn cancel(&self) {}

        async fn probe(&self) -> Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wifi_event() -> PathEvent {
        PathEvent::satisfied(vec![PathInterface::new("wlan0", InterfaceKind::Wifi)])
            .with_latency(12.0)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn engine(source: Arc<ManualSource>) -> ReachabilityEngine {
        ReachabilityEngine::new(&Config::default(), source)
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let source = ManualSource::new();
        let mut engine = engine(source);
        engine.start_monitoring().await.unwrap();
        assert!(matches!(
            engine.start_monitoring().await,
            Err(EngineError::AlreadyRunning)
        ));
        engine.stop_monitoring().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_failed_source_start_leaves_engine_stopped() {
        let source = ManualSource::failing();
        let mut engine = engine(source);
        assert!(engine.start_monitoring().await.is_err());
        assert!(!engine.is_running());
        // a later start against a working source would be allowed
    }

    #[tokio::test]
    async fn test_event_updates_state_and_history() {
        let source = ManualSource::new();
        let mut engine = engine(source.clone());

        let changes = Arc::new(AtomicU64::new(0));
        let changes_clone = changes.clone();
        engine.on_path_change(Box::new(move |_m| {
            changes_clone.fetch_add(1, Ordering::SeqCst);
        }));

        engine.start_monitoring().await.unwrap();
        source.emit(wifi_event()).await;

        wait_until(|| engine.history().len() == 1).await;
        assert_eq!(engine.current_connection(), ConnectionClass::Wifi);
        assert!(engine.is_reachable());
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        let metric = &engine.history()[0];
        assert_eq!(metric.connection_type, "wifi");
        assert_eq!(metric.latency_ms, 12.0);

        engine.stop_monitoring().await;
    }

    #[tokio::test]
    async fn test_repeated_events_still_append() {
        let source = ManualSource::new();
        let mut engine = engine(source.clone());
        engine.start_monitoring().await.unwrap();

        for _ in 0..5 {
            source.emit(wifi_event()).await;
        }
        wait_until(|| engine.history().len() == 5).await;
        assert_eq!(engine.current_connection(), ConnectionClass::Wifi);

        engine.stop_monitoring().await;
    }

    #[tokio::test]
    async fn test_unavailable_arms_recycle_and_recovery_disarms() {
        let source = ManualSource::new();
        let mut engine = engine(source.clone());
        engine.start_monitoring().await.unwrap();

        source.emit(PathEvent::unsatisfied()).await;
        wait_until(|| engine.history().len() == 1).await;
        assert_eq!(engine.current_connection(), ConnectionClass::Unavailable);
        assert!(!engine.is_reachable());
        assert!(engine.recycle_armed());
        // synthesized metric reflects total loss
        assert_eq!(engine.history()[0].packet_loss_pct, 100.0);

        let cellular =
            PathEvent::satisfied(vec![PathInterface::new("pdp0", InterfaceKind::Cellular)]);
        source.emit(cellular).await;
        wait_until(|| engine.history().len() == 2).await;
        assert_eq!(engine.current_connection(), ConnectionClass::Cellular);
        assert!(!engine.recycle_armed());

        engine.stop_monitoring().await;
    }

    #[tokio::test]
    async fn test_no_appends_after_stop() {
        let source = ManualSource::new();
        let mut engine = engine(source.clone());
        engine.start_monitoring().await.unwrap();

        source.emit(wifi_event()).await;
        wait_until(|| engine.history().len() == 1).await;

        // keep a sender alive across the stop to simulate a late delivery
        let late_tx = source.sender();
        engine.stop_monitoring().await;

        let _ = late_tx.send(wifi_event()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.current_connection(), ConnectionClass::Wifi);
    }

    #[tokio::test]
    async fn test_recycle_check_probes_source() {
        let source = ManualSource::new();
        let engine = engine(source.clone());
        engine.recycle_check().await.unwrap();
        assert_eq!(source.probes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.recycle_checks(), 1);
    }
}
