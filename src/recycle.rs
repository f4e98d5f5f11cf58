//! Recycle scheduler: forced connectivity re-probes while unreachable.
//!
//! Two states: idle and armed. Armed exactly while the current connection
//! class is Unavailable. While armed, re-probes the path source on an
//! exponential-backoff schedule (capped), so liveness checks still happen
//! for monitors that only push events on change. At most one probe is in
//! flight at a time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RecycleConfig;
use crate::error::Result;
use crate::path::PathSource;

/// Next backoff delay: grow by `multiplier`, capped at `max`.
fn next_delay(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let grown = current.mul_f64(multiplier.max(1.0));
    grown.min(max)
}

pub struct RecycleScheduler {
    config: RecycleConfig,
    source: Arc<dyn PathSource>,
    armed: Arc<AtomicBool>,
    checks: Arc<AtomicU64>,
    gate: Arc<tokio::sync::Mutex<()>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RecycleScheduler {
    pub fn new(config: RecycleConfig, source: Arc<dyn PathSource>) -> Self {
        Self {
            config,
            source,
            armed: Arc::new(AtomicBool::new(false)),
            checks: Arc::new(AtomicU64::new(0)),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            task: Mutex::new(None),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Re-probe attempts performed so far.
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::SeqCst)
    }

    /// Start the periodic re-probe loop. Arming twice is a no-op.
    pub fn arm(&self) {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("recycle scheduler armed");

        let armed = self.armed.clone();
        let source = self.source.clone();
        let gate = self.gate.clone();
        let checks = self.checks.clone();
        let initial = Duration::from_secs(self.config.initial_interval_secs.max(1));
        let max = Duration::from_secs(self.config.max_interval_secs.max(1));
        let multiplier = self.config.backoff_multiplier;

        let handle = tokio::spawn(async move {
            let mut delay = initial;
            loop {
                tokio::time::sleep(delay).await;
                if !armed.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = Self::run_check(&source, &gate, &checks).await {
                    warn!("recycle check failed: {}", e);
                }
                delay = next_delay(delay, multiplier, max);
            }
        });

        let mut task = self.task.lock();
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
    }

    /// Stop the loop immediately. Disarming twice is a no-op.
    pub fn disarm(&self) {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("recycle scheduler disarmed");
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    /// One on-demand re-probe. Overlapping calls are dropped, never queued.
    pub async fn check(&self) -> Result<()> {
        Self::run_check(&self.source, &self.gate, &self.checks).await
    }

    async fn run_check(
        source: &Arc<dyn PathSource>,
        gate: &tokio::sync::Mutex<()>,
        checks: &AtomicU64,
    ) -> Result<()> {
        let Ok(_guard) = gate.try_lock() else {
            debug!("recycle probe already in flight, skipping");
            return Ok(());
        };
        source.probe().await?;
        let n = checks.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("recycle check #{} complete", n);
        Ok(())
    }
}

impl Drop for RecycleScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}
