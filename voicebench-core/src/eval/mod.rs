//! Multi-dimensional evaluation of completed runs.
//!
//! Each dimension has its own scorer producing a `{score ∈ [0,1]}` plus
//! dimension-specific detail; [`EvaluationHarness`] orchestrates them and
//! aggregates an overall score.

pub mod accuracy;
pub mod latency;
pub mod naturalness;
pub mod robustness;

use serde::Serialize;

use crate::results::TestResults;

pub use accuracy::{AccuracyScore, AccuracyScorer};
pub use latency::{LatencyScore, LatencyScorer};
pub use naturalness::{NaturalnessJudge, NaturalnessScore, NaturalnessScorer};
pub use robustness::{RobustnessScore, RobustnessScorer};

/// Tool-use quality: success rate of recorded calls.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUseScore {
    pub score: f64,
    pub total_calls: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

pub fn score_tool_use(results: &TestResults) -> ToolUseScore {
    let calls = &results.tool_calls.calls;
    if calls.is_empty() {
        return ToolUseScore {
            score: 1.0,
            total_calls: 0,
            success_rate: 1.0,
            avg_latency_ms: 0.0,
        };
    }

    let success_count = calls.iter().filter(|c| c.success).count();
    let success_rate = success_count as f64 / calls.len() as f64;
    let avg_latency_ms = calls.iter().map(|c| c.latency_ms).sum::<f64>() / calls.len() as f64;

    ToolUseScore {
        score: success_rate,
        total_calls: calls.len(),
        success_rate,
        avg_latency_ms,
    }
}

/// Aggregated scores from all evaluation dimensions.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub latency: LatencyScore,
    pub accuracy: AccuracyScore,
    pub naturalness: NaturalnessScore,
    pub tool_use: ToolUseScore,
    pub overall_score: f64,
}

/// Runs every scorer against a `TestResults` and aggregates a report.
#[derive(Default)]
pub struct EvaluationHarness {
    latency: LatencyScorer,
    accuracy: AccuracyScorer,
    naturalness: NaturalnessScorer,
    robustness: RobustnessScorer,
}

impl EvaluationHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific judge backend for the naturalness dimension.
    pub fn with_judge(mut self, judge: std::sync::Arc<dyn NaturalnessJudge>) -> Self {
        self.naturalness = NaturalnessScorer::with_judge(judge);
        self
    }

    pub async fn evaluate(&self, results: &TestResults) -> EvaluationReport {
        let latency = self.latency.score(results);
        let accuracy = self.accuracy.score(results);
        let tool_use = score_tool_use(results);
        let naturalness = self.naturalness.score(results).await;

        let dims = [
            latency.score,
            accuracy.score,
            naturalness.score,
            tool_use.score,
        ];
        let overall_score = dims.iter().sum::<f64>() / dims.len() as f64;

        EvaluationReport {
            latency,
            accuracy,
            naturalness,
            tool_use,
            overall_score,
        }
    }

    /// Compare clean vs degraded runs for the robustness dimension.
    pub fn evaluate_robustness(
        &self,
        clean: &TestResults,
        noisy: Option<&TestResults>,
    ) -> RobustnessScore {
        self.robustness.score(clean, noisy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::JsonMap;
    use crate::results::ToolCallRecord;

    fn call(success: bool, latency_ms: f64) -> ToolCallRecord {
        ToolCallRecord {
            tool: "t".into(),
            args: JsonMap::new(),
            timestamp: 0.0,
            success,
            latency_ms,
        }
    }

    #[test]
    fn tool_use_is_perfect_with_no_calls() {
        let results = TestResults::default();
        let score = score_tool_use(&results);
        assert_eq!(score.score, 1.0);
        assert_eq!(score.total_calls, 0);
    }

    #[test]
    fn tool_use_is_the_success_rate() {
        let mut results = TestResults::default();
        results.tool_calls.calls = vec![call(true, 100.0), call(false, 300.0)];
        let score = score_tool_use(&results);
        assert_eq!(score.score, 0.5);
        assert_eq!(score.avg_latency_ms, 200.0);
    }

    #[tokio::test]
    async fn report_aggregates_the_dimension_mean() {
        let mut results = TestResults::default();
        results.record_response("Certainly, I can help with that booking.", &[], 1.0);
        let report = EvaluationHarness::new().evaluate(&results).await;
        assert!(report.overall_score > 0.0 && report.overall_score <= 1.0);
        let expected = (report.latency.score
            + report.accuracy.score
            + report.naturalness.score
            + report.tool_use.score)
            / 4.0;
        assert!((report.overall_score - expected).abs() < 1e-9);
    }
}
