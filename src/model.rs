//! Local anomaly inference.
//!
//! The engine consumes any [`AnomalyModel`]; the built-in [`BaselineModel`]
//! learns per-feature statistics online and scores samples by z-score
//! distance from the learned baseline.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::error::{EngineError, Result};
use crate::types::{FeatureVector, NUM_FEATURES};

/// Local inference model: given a metric's feature projection, returns an
/// anomaly probability in `[0, 1]`. Fails on malformed input.
#[async_trait]
pub trait AnomalyModel: Send + Sync {
    async fn predict(&self, features: &FeatureVector) -> Result<f64>;
}

/// Statistics for a single feature (Welford's online algorithm).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureStats {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
}

impl FeatureStats {
    /// Update stats with a new value
    #[inline]
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Get standard deviation
    #[inline]
    pub fn std(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    /// Get z-score for a value (0 when the baseline is degenerate)
    #[inline]
    pub fn zscore(&self, value: f64) -> f64 {
        let std = self.std();
        if std < f64::EPSILON {
            0.0
        } else {
            (value - self.mean) / std
        }
    }
}

/// Z-score above which a sample maps to probability 0.5.
const Z_THRESHOLD: f64 = 3.0;

/// Heuristic weight before the baseline is trained.
const HEURISTIC_CEILING: f64 = 0.9;

/// Built-in statistical model.
///
/// Learns what "normal" latency and loss look like from observed metrics
/// (`observe`). Once enough samples exist, prediction is the z-score of the
/// worst feature mapped into `[0, 1]`; before that (or when the baseline is
/// degenerate) a nominal-latency/loss heuristic stands in, so a cold engine
/// still flags grossly bad samples.
pub struct BaselineModel {
    stats: RwLock<[FeatureStats; NUM_FEATURES]>,
    min_samples: u64,
    nominal_latency_ms: f64,
    nominal_loss_pct: f64,
}

impl BaselineModel {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            stats: RwLock::new(Default::default()),
            min_samples: 20,
            nominal_latency_ms: config.nominal_latency_ms,
            nominal_loss_pct: config.nominal_loss_pct,
        }
    }

    /// Override how many samples must be observed before the learned
    /// baseline takes over from the heuristic.
    pub fn with_min_samples(mut self, min_samples: u64) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Feed an observation into the baseline.
    pub fn observe(&self, features: &FeatureVector) {
        if !features.is_finite() {
            return;
        }
        let mut stats = self.stats.write();
        for (s, v) in stats.iter_mut().zip(features.0.iter()) {
            s.update(*v);
        }
    }

    /// Samples observed so far.
    pub fn sample_count(&self) -> u64 {
        self.stats.read()[0].count
    }

    fn heuristic(&self, features: &FeatureVector) -> f64 {
        let latency_term = HEURISTIC_CEILING * (features.0[0] / (2.0 * self.nominal_latency_ms)).min(1.0);
        let loss_term = HEURISTIC_CEILING * (features.0[1] / (2.0 * self.nominal_loss_pct)).min(1.0);
        latency_term.max(loss_term)
    }
}

#[async_trait]
impl AnomalyModel for BaselineModel {
    async fn predict(&self, features: &FeatureVector) -> Result<f64> {
        if !features.is_finite() {
            return Err(EngineError::Model("non-finite feature input".to_string()));
        }

        let stats = self.stats.read();
        let trained = stats[0].count >= self.min_samples;
        // connection_code is tracked but not scored; class changes are not
        // scalar outliers
        let degenerate = stats[..2].iter().all(|s| s.std() < f64::EPSILON);
        if !trained || degenerate {
            return Ok(self.heuristic(features));
        }

        let z = stats[..2]
            .iter()
            .zip(features.0.iter())
            .map(|(s, v)| s.zscore(*v).abs())
            .fold(0.0_f64, f64::max);

        Ok((z / (2.0 * Z_THRESHOLD)).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkMetric;

    fn model() -> BaselineModel {
        BaselineModel::new(&DetectionConfig::default())
    }

    #[tokio::test]
    async fn test_untrained_high_latency_is_anomalous() {
        let m = model();
        let features = NetworkMetric::new("wifi", 100.0, 0.0).features();
        let prob = m.predict(&features).await.unwrap();
        assert!(prob >= 0.5, "expected anomalous, got {}", prob);
    }

    #[tokio::test]
    async fn test_untrained_nominal_sample_is_normal() {
        let m = model();
        let features = NetworkMetric::new("cellular", 10.0, 5.0).features();
        let prob = m.predict(&features).await.unwrap();
        assert!(prob < 0.5, "expected normal, got {}", prob);
    }

    #[tokio::test]
    async fn test_malformed_input_fails() {
        let m = model();
        let features = FeatureVector([f64::NAN, 0.0, 1.0]);
        assert!(m.predict(&features).await.is_err());
    }

    #[tokio::test]
    async fn test_trained_baseline_scores_outliers() {
        let m = model().with_min_samples(10);
        // alternate around 10ms so the baseline has spread
        for i in 0..30 {
            let latency = if i % 2 == 0 { 9.0 } else { 11.0 };
            m.observe(&NetworkMetric::new("wifi", latency, 0.5).features());
        }
        assert_eq!(m.sample_count(), 30);

        let normal = m
            .predict(&NetworkMetric::new("wifi", 10.0, 0.5).features())
            .await
            .unwrap();
        let outlier = m
            .predict(&NetworkMetric::new("wifi", 200.0, 0.5).features())
            .await
            .unwrap();
        assert!(normal < 0.5, "baseline sample scored {}", normal);
        assert!(outlier >= 0.5, "outlier scored {}", outlier);
    }

    #[tokio::test]
    async fn test_degenerate_baseline_falls_back_to_heuristic() {
        let m = model().with_min_samples(5);
        for _ in 0..10 {
            m.observe(&NetworkMetric::new("wifi", 10.0, 0.0).features());
        }
        // identical samples give zero variance; heuristic still flags this
        let prob = m
            .predict(&NetworkMetric::new("wifi", 150.0, 0.0).features())
            .await
            .unwrap();
        assert!(prob >= 0.5, "expected heuristic fallback, got {}", prob);
    }

    #[test]
    fn test_feature_stats_welford() {
        let mut s = FeatureStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.update(v);
        }
        assert_eq!(s.count, 8);
        assert!((s.mean - 5.0).abs() < 1e-9);
        // sample std of the classic example set
        assert!((s.std() - 2.1380899).abs() < 1e-4);
    }
}
