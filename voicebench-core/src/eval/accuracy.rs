//! Accuracy scoring: intent recognition, entity extraction, visual
//! grounding.

use serde::Serialize;

use crate::results::TestResults;

const INTENT_WEIGHT: f64 = 0.4;
const ENTITY_WEIGHT: f64 = 0.3;
const VISUAL_WEIGHT: f64 = 0.1;
const OVERALL_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Serialize)]
pub struct AccuracyScore {
    pub score: f64,
    pub intent_recognition: f64,
    pub entity_extraction: f64,
    pub visual_grounding: f64,
    pub overall_accuracy: f64,
}

#[derive(Debug, Default)]
pub struct AccuracyScorer;

impl AccuracyScorer {
    pub fn score(&self, results: &TestResults) -> AccuracyScore {
        let acc = &results.accuracy;

        let mut intent = acc.intent_recognition;
        let mut entity = acc.entity_extraction;
        let mut overall_accuracy = acc.overall;

        // Fall back to the assertion pass-rate when explicit accuracy
        // metrics were never populated.
        if overall_accuracy == 0.0 && !results.assertions.is_empty() {
            let passed = results.assertions.iter().filter(|a| a.passed).count();
            overall_accuracy = passed as f64 / results.assertions.len() as f64;
            intent = overall_accuracy;
            entity = overall_accuracy;
        }

        let score = intent * INTENT_WEIGHT
            + entity * ENTITY_WEIGHT
            + acc.visual_grounding * VISUAL_WEIGHT
            + overall_accuracy * OVERALL_WEIGHT;

        AccuracyScore {
            score,
            intent_recognition: intent,
            entity_extraction: entity,
            visual_grounding: acc.visual_grounding,
            overall_accuracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::AssertionResult;
    use approx::assert_relative_eq;

    #[test]
    fn explicit_metrics_are_weighted() {
        let mut results = TestResults::default();
        results.accuracy.intent_recognition = 1.0;
        results.accuracy.entity_extraction = 0.5;
        results.accuracy.visual_grounding = 0.0;
        results.accuracy.overall = 0.8;

        let score = AccuracyScorer.score(&results);
        assert_relative_eq!(score.score, 0.4 + 0.15 + 0.16, epsilon = 1e-9);
    }

    #[test]
    fn falls_back_to_assertion_pass_rate() {
        let mut results = TestResults::default();
        results.add(AssertionResult::pass(0.0, "a"));
        results.add(AssertionResult::fail(1.0, "b"));

        let score = AccuracyScorer.score(&results);
        assert_relative_eq!(score.overall_accuracy, 0.5, epsilon = 1e-9);
        assert_relative_eq!(score.intent_recognition, 0.5, epsilon = 1e-9);
        // visual grounding stays unpopulated
        assert_relative_eq!(score.score, 0.5 * (0.4 + 0.3 + 0.2), epsilon = 1e-9);
    }

    #[test]
    fn empty_results_score_zero() {
        let score = AccuracyScorer.score(&TestResults::default());
        assert_eq!(score.score, 0.0);
    }
}
