//! Path sources: where path events come from.
//!
//! The engine consumes any [`PathSource`]; [`TcpProbe`] is the built-in
//! implementation, classifying reachability by timing a TCP connect to a
//! configured endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::error::{EngineError, Result};
use crate::types::{InterfaceKind, PathEvent, PathInterface};

/// Source of path-status events.
#[async_trait]
pub trait PathSource: Send + Sync {
    /// Begin delivering events on the given channel. Fails if the source
    /// cannot initialize.
    fn start(&self, events: mpsc::Sender<PathEvent>) -> Result<()>;

    /// Stop delivering events. Late deliveries after cancel are dropped by
    /// the engine, not the source's problem.
    fn cancel(&self);

    /// Force a fresh path evaluation now. Sources that measure on demand
    /// emit a new event as a result; push-only sources may treat this as a
    /// no-op.
    async fn probe(&self) -> Result<()>;
}

/// Connectivity prober that times a TCP connect to a fixed endpoint.
///
/// While started it probes on a fixed interval; `probe()` runs one
/// additional on-demand attempt (used by the recycle scheduler).
pub struct TcpProbe {
    config: ProbeConfig,
    events: Arc<RwLock<Option<mpsc::Sender<PathEvent>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            events: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    /// One connect attempt against `target`; returns the resulting event.
    async fn probe_once(target: &str, timeout: Duration) -> PathEvent {
        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!("probe to {} succeeded in {:.1}ms", target, latency_ms);
                PathEvent::satisfied(vec![PathInterface::new("tcp", InterfaceKind::Other)])
                    .with_latency(latency_ms)
            }
            Ok(Err(e)) => {
                debug!("probe to {} failed: {}", target, e);
                PathEvent::unsatisfied()
            }
            Err(_) => {
                debug!("probe to {} timed out after {:?}", target, timeout);
                PathEvent::unsatisfied()
            }
        }
    }

    async fn run_probe(&self) -> Result<()> {
        let tx = self
            .events
            .read()
            .clone()
            .ok_or_else(|| EngineError::PathSource("probe source not started".to_string()))?;

        let event =
            Self::probe_once(&self.config.target, Duration::from_millis(self.config.timeout_ms))
                .await;
        // receiver gone means monitoring stopped; nothing to report
        let _ = tx.send(event).await;
        Ok(())
    }
}

#[async_trait]
impl PathSource for TcpProbe {
    fn start(&self, events: mpsc::Sender<PathEvent>) -> Result<()> {
        if self.config.target.is_empty() {
            return Err(EngineError::PathSource("probe target is empty".to_string()));
        }

        *self.events.write() = Some(events.clone());

        let target = self.config.target.clone();
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let interval = Duration::from_secs(self.config.interval_secs.max(1));

        let handle = tokio::spawn(async move {
            loop {
                let event = Self::probe_once(&target, timeout).await;
                if events.send(event).await.is_err() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });

        let mut task = self.task.lock();
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    fn cancel(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        *self.events.write() = None;
    }

    async fn probe(&self) -> Result<()> {
        if let Err(e) = self.run_probe().await {
            warn!("on-demand probe failed: {}", e);
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for TcpProbe {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}
