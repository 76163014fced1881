//! Regression detection against stored metric baselines.
//!
//! Baselines are flat JSON metric maps (`pass_rate`, `latency_p50`,
//! `accuracy_avg`) kept in a directory that can be committed to version
//! control. A regression fires when a metric drops more than `threshold`
//! relative to its baseline value.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::results::TestResults;

const DEFAULT_THRESHOLD: f64 = 0.05;

/// One metric whose value moved beyond the threshold.
#[derive(Debug, Clone, Serialize)]
pub struct RegressionFinding {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    /// Relative change in percent, negative for regressions.
    pub delta_pct: f64,
}

/// Outcome of a regression check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegressionReport {
    pub has_regression: bool,
    pub regressions: Vec<RegressionFinding>,
    pub improvements: Vec<RegressionFinding>,
    pub unchanged: Vec<String>,
}

pub struct RegressionDetector {
    baseline_dir: PathBuf,
    threshold: f64,
}

impl RegressionDetector {
    pub fn new(baseline_dir: impl Into<PathBuf>) -> Self {
        Self {
            baseline_dir: baseline_dir.into(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Compare `results` against the named baseline. A missing baseline
    /// is saved from the current results and reports no regression.
    pub fn check(&self, results: &[&TestResults], baseline_name: &str) -> Result<RegressionReport> {
        let Some(baseline) = self.load_baseline(baseline_name)? else {
            info!(
                baseline = baseline_name,
                "no baseline found — saving current results as baseline"
            );
            self.save_baseline(results, baseline_name)?;
            return Ok(RegressionReport::default());
        };

        let current = extract_metrics(results);
        let mut report = RegressionReport::default();

        for (metric, current_value) in current {
            let Some(baseline_value) = baseline.get(&metric).copied() else {
                continue;
            };
            if baseline_value == 0.0 {
                report.unchanged.push(metric);
                continue;
            }

            let delta = (current_value - baseline_value) / baseline_value.abs();
            let finding = RegressionFinding {
                metric: metric.clone(),
                baseline: baseline_value,
                current: current_value,
                delta_pct: (delta * 100.0 * 100.0).round() / 100.0,
            };

            if delta < -self.threshold {
                report.regressions.push(finding);
            } else if delta > self.threshold {
                report.improvements.push(finding);
            } else {
                report.unchanged.push(metric);
            }
        }

        report.has_regression = !report.regressions.is_empty();
        Ok(report)
    }

    /// Save current results as the new named baseline.
    pub fn update_baseline(&self, results: &[&TestResults], baseline_name: &str) -> Result<PathBuf> {
        self.save_baseline(results, baseline_name)
    }

    pub fn baseline_path(&self, name: &str) -> PathBuf {
        self.baseline_dir.join(format!("{name}.json"))
    }

    fn load_baseline(&self, name: &str) -> Result<Option<BTreeMap<String, f64>>> {
        let path = self.baseline_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let metrics = serde_json::from_str(&raw).map_err(|e| {
            crate::error::HarnessError::Config(format!("baseline {}: {e}", path.display()))
        })?;
        Ok(Some(metrics))
    }

    fn save_baseline(&self, results: &[&TestResults], name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.baseline_dir)?;
        let path = self.baseline_path(name);
        let metrics = extract_metrics(results);
        let raw = serde_json::to_string_pretty(&metrics)
            .map_err(|e| crate::error::HarnessError::Config(format!("encode baseline: {e}")))?;
        std::fs::write(&path, raw)?;
        Ok(path)
    }
}

/// Flatten runs into scalar metrics.
fn extract_metrics(results: &[&TestResults]) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();

    let total = results.len();
    let passed = results.iter().filter(|r| r.passed()).count();
    metrics.insert(
        "pass_rate".to_owned(),
        if total > 0 {
            passed as f64 / total as f64
        } else {
            0.0
        },
    );

    let mut latencies: Vec<f64> = results
        .iter()
        .flat_map(|r| r.latency.first_byte_latencies.iter().copied())
        .collect();
    if !latencies.is_empty() {
        latencies.sort_by(f64::total_cmp);
        metrics.insert("latency_p50".to_owned(), latencies[latencies.len() / 2]);
    }

    let accuracies: Vec<f64> = results
        .iter()
        .map(|r| r.accuracy.overall)
        .filter(|a| *a > 0.0)
        .collect();
    if !accuracies.is_empty() {
        metrics.insert(
            "accuracy_avg".to_owned(),
            accuracies.iter().sum::<f64>() / accuracies.len() as f64,
        );
    }

    metrics
}
