//! Latency scoring against real-time voice interaction thresholds.

use serde::Serialize;

use crate::results::TestResults;

/// Industry expectations for a responsive voice system (milliseconds).
pub const P50_FIRST_BYTE_MS: f64 = 300.0;
pub const P99_FIRST_BYTE_MS: f64 = 1000.0;
pub const TURN_GAP_MS: f64 = 500.0;

#[derive(Debug, Clone, Serialize)]
pub struct LatencyScore {
    pub score: f64,
    pub first_byte_p50_ms: f64,
    pub first_byte_p99_ms: f64,
    pub turn_gap_avg_ms: f64,
    pub p50_pass: bool,
    pub p99_pass: bool,
    pub turn_gap_pass: bool,
}

/// Piecewise-linear penalty: 1.0 at zero, 0.0 at twice the threshold.
fn component(observed: f64, threshold: f64) -> f64 {
    (1.0 - observed / (threshold * 2.0)).max(0.0)
}

#[derive(Debug, Default)]
pub struct LatencyScorer;

impl LatencyScorer {
    pub fn score(&self, results: &TestResults) -> LatencyScore {
        let latency = &results.latency;
        let p50 = latency.p50_first_byte();
        let p99 = latency.p99_first_byte();
        let turn_gap = latency.turn_gap_avg();

        let overall = if p50 == 0.0 && p99 == 0.0 && turn_gap == 0.0 {
            // Nothing measured — a silent run is not penalized here.
            1.0
        } else {
            (component(p50, P50_FIRST_BYTE_MS)
                + component(p99, P99_FIRST_BYTE_MS)
                + component(turn_gap, TURN_GAP_MS))
                / 3.0
        };

        LatencyScore {
            score: overall,
            first_byte_p50_ms: p50,
            first_byte_p99_ms: p99,
            turn_gap_avg_ms: turn_gap,
            p50_pass: p50 <= P50_FIRST_BYTE_MS,
            p99_pass: p99 <= P99_FIRST_BYTE_MS,
            turn_gap_pass: turn_gap <= TURN_GAP_MS,
        }
    }
}
