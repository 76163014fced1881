//! Robustness scoring: how gracefully the system degrades under noise.

use serde::Serialize;

use crate::results::TestResults;

const ACCURACY_WEIGHT: f64 = 0.4;
const LATENCY_WEIGHT: f64 = 0.3;
const BARGE_IN_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct RobustnessScore {
    pub score: f64,
    pub noise_degradation: f64,
    pub latency_ratio: f64,
    pub barge_in_handling: f64,
    pub clean_accuracy: f64,
    pub noisy_accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Default)]
pub struct RobustnessScorer;

impl RobustnessScorer {
    /// Compare a clean run against a degraded one. Ratios close to 1.0
    /// mean the system barely noticed the degradation.
    pub fn score(&self, clean: &TestResults, noisy: Option<&TestResults>) -> RobustnessScore {
        let Some(noisy) = noisy else {
            return RobustnessScore {
                score: 1.0,
                noise_degradation: 1.0,
                latency_ratio: 1.0,
                barge_in_handling: 0.0,
                clean_accuracy: effective_accuracy(clean),
                noisy_accuracy: 0.0,
                note: Some("No noisy results provided for comparison".into()),
            };
        };

        let clean_accuracy = effective_accuracy(clean);
        let noisy_accuracy = effective_accuracy(noisy);
        let noise_degradation = if clean_accuracy > 0.0 {
            noisy_accuracy / clean_accuracy
        } else {
            0.0
        };

        let clean_latency = nonzero_or(clean.latency.p50_first_byte(), 1.0);
        let noisy_latency = nonzero_or(noisy.latency.p50_first_byte(), 1.0);
        let latency_ratio = clean_latency / noisy_latency;

        let barge_in_handling = if noisy.barge_in.was_handled { 1.0 } else { 0.0 };

        let score = noise_degradation * ACCURACY_WEIGHT
            + latency_ratio.min(1.0) * LATENCY_WEIGHT
            + barge_in_handling * BARGE_IN_WEIGHT;

        RobustnessScore {
            score,
            noise_degradation,
            latency_ratio,
            barge_in_handling,
            clean_accuracy,
            noisy_accuracy,
            note: None,
        }
    }
}

fn nonzero_or(value: f64, fallback: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        fallback
    }
}

fn effective_accuracy(results: &TestResults) -> f64 {
    if results.accuracy.overall > 0.0 {
        return results.accuracy.overall;
    }
    if !results.assertions.is_empty() {
        let passed = results.assertions.iter().filter(|a| a.passed).count();
        return passed as f64 / results.assertions.len() as f64;
    }
    1.0
}
