//! Conversational naturalness scoring.
//!
//! With a judge backend configured (and a non-empty transcript), an LLM
//! grades the conversation 1–5 against a fixed rubric and the raw grade
//! is normalised to [0, 1]. Without one — or when the judge call fails —
//! a heuristic combines lexical diversity with mean response length.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::results::TestResults;

/// Grading rubric sent to the judge.
pub const RUBRIC: &str = "\
Evaluate the naturalness of this voice conversation system's responses (1-5):

5: Completely human-like conversation, natural intonation and rhythm
4: Mostly natural, occasional slight mechanical feel
3: Understandable but clearly AI, awkward transitions
2: Frequent unnatural pauses or repetitions
1: Severely mechanical, conversation hard to sustain

Pay special attention to:
- Recovery after interruptions / barge-in
- Use of appropriate filler phrases (vs awkward silence)
- Handling of colloquial / incomplete sentences
";

/// Response length (chars) considered conversationally ideal.
const IDEAL_RESPONSE_CHARS: f64 = 100.0;
/// Beyond this length the rambling penalty kicks in.
const RAMBLING_CHARS: f64 = 500.0;

/// Verdict returned by a judge backend.
#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    /// Raw grade on the 1–5 rubric scale.
    pub score: f64,
    pub reasoning: String,
}

/// LLM-as-judge seam.
#[async_trait]
pub trait NaturalnessJudge: Send + Sync {
    async fn judge(&self, rubric: &str, transcript: &str) -> anyhow::Result<JudgeVerdict>;
}

#[derive(Debug, Clone, Serialize)]
pub struct NaturalnessScore {
    pub score: f64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diversity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_length: Option<f64>,
}

#[derive(Default)]
pub struct NaturalnessScorer {
    judge: Option<std::sync::Arc<dyn NaturalnessJudge>>,
}

impl NaturalnessScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_judge(judge: std::sync::Arc<dyn NaturalnessJudge>) -> Self {
        Self { judge: Some(judge) }
    }

    pub async fn score(&self, results: &TestResults) -> NaturalnessScore {
        let transcript = build_transcript(results);

        if let Some(judge) = &self.judge {
            if !transcript.is_empty() {
                match judge.judge(RUBRIC, &transcript).await {
                    Ok(verdict) => {
                        return NaturalnessScore {
                            score: (verdict.score / 5.0).clamp(0.0, 1.0),
                            method: "llm_judge".into(),
                            raw_score: Some(verdict.score),
                            reasoning: Some(verdict.reasoning),
                            diversity: None,
                            avg_response_length: None,
                        };
                    }
                    Err(error) => {
                        debug!(%error, "judge unavailable, falling back to heuristic");
                    }
                }
            }
        }

        heuristic_score(results)
    }
}

fn heuristic_score(results: &TestResults) -> NaturalnessScore {
    let texts: Vec<&str> = results
        .responses
        .iter()
        .filter(|r| !r.text.is_empty())
        .map(|r| r.text.as_str())
        .collect();

    if texts.is_empty() {
        return NaturalnessScore {
            score: 0.5,
            method: "heuristic".into(),
            raw_score: None,
            reasoning: Some("No text responses to evaluate".into()),
            diversity: None,
            avg_response_length: None,
        };
    }

    let unique: std::collections::HashSet<&str> = texts.iter().copied().collect();
    let diversity = unique.len() as f64 / texts.len() as f64;

    let avg_len =
        texts.iter().map(|t| t.chars().count()).sum::<usize>() as f64 / texts.len() as f64;
    // Too short reads robotic, too long reads rambling.
    let length_score = if avg_len < RAMBLING_CHARS {
        (avg_len / IDEAL_RESPONSE_CHARS).min(1.0)
    } else {
        (1.0 - (avg_len - RAMBLING_CHARS) / 1000.0).max(0.5)
    };

    NaturalnessScore {
        score: diversity * 0.5 + length_score * 0.5,
        method: "heuristic".into(),
        raw_score: None,
        reasoning: None,
        diversity: Some(diversity),
        avg_response_length: Some(avg_len),
    }
}

/// Format the run into a readable transcript for the judge.
fn build_transcript(results: &TestResults) -> String {
    let mut lines: Vec<String> = Vec::new();
    for response in &results.responses {
        if !response.text.is_empty() {
            lines.push(format!(
                "[{:.2}s] System: {}",
                response.timestamp, response.text
            ));
        }
    }
    for call in &results.tool_calls.calls {
        lines.push(format!(
            "[{:.2}s] Tool call: {}({})",
            call.timestamp,
            call.tool,
            serde_json::Value::Object(call.args.clone())
        ));
    }
    lines.sort();
    lines.join("\n")
}

#[cfg(feature = "judge")]
pub use http_judge::HttpJudge;

#[cfg(feature = "judge")]
mod http_judge {
    use super::{JudgeVerdict, NaturalnessJudge};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
    const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

    /// Judge backed by an Anthropic-compatible messages endpoint.
    ///
    /// The API key comes from `ANTHROPIC_API_KEY`; when it is unset the
    /// scorer never reaches this type and takes the heuristic path.
    pub struct HttpJudge {
        client: reqwest::Client,
        endpoint: String,
        model: String,
        api_key: String,
    }

    impl HttpJudge {
        pub fn new(api_key: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                endpoint: DEFAULT_ENDPOINT.into(),
                model: DEFAULT_MODEL.into(),
                api_key: api_key.into(),
            }
        }

        /// Read the key from the environment, if configured.
        pub fn from_env() -> Option<Self> {
            std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.is_empty())
                .map(Self::new)
        }

        pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
            self.endpoint = endpoint.into();
            self
        }

        pub fn with_model(mut self, model: impl Into<String>) -> Self {
            self.model = model.into();
            self
        }
    }

    #[async_trait]
    impl NaturalnessJudge for HttpJudge {
        async fn judge(&self, rubric: &str, transcript: &str) -> anyhow::Result<JudgeVerdict> {
            let prompt = format!(
                "{rubric}\nConversation:\n{transcript}\n\n\
                 Respond with JSON: {{\"score\": <1-5>, \"reasoning\": \"...\"}}"
            );

            let body = json!({
                "model": self.model,
                "max_tokens": 1024,
                "messages": [{ "role": "user", "content": prompt }],
            });

            let response: Value = self
                .client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let text = response["content"][0]["text"].as_str().unwrap_or_default();
            let parsed: Value = serde_json::from_str(text).unwrap_or(json!({
                "score": 3,
                "reasoning": text,
            }));

            Ok(JudgeVerdict {
                score: parsed["score"].as_f64().unwrap_or(3.0),
                reasoning: parsed["reasoning"].as_str().unwrap_or_default().to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedJudge {
        score: f64,
    }

    #[async_trait]
    impl NaturalnessJudge for FixedJudge {
        async fn judge(&self, _rubric: &str, _transcript: &str) -> anyhow::Result<JudgeVerdict> {
            Ok(JudgeVerdict {
                score: self.score,
                reasoning: "scripted".into(),
            })
        }
    }

    struct BrokenJudge;

    #[async_trait]
    impl NaturalnessJudge for BrokenJudge {
        async fn judge(&self, _rubric: &str, _transcript: &str) -> anyhow::Result<JudgeVerdict> {
            anyhow::bail!("judge offline")
        }
    }

    fn talkative_results() -> TestResults {
        let mut results = TestResults::default();
        results.record_response("Of course, let me check the availability for you.", &[], 1.0);
        results.record_response("The King Room is available for those dates.", &[], 2.0);
        results
    }

    #[tokio::test]
    async fn judge_grade_normalises_to_unit_interval() {
        let scorer = NaturalnessScorer::with_judge(Arc::new(FixedJudge { score: 4.0 }));
        let score = scorer.score(&talkative_results()).await;
        assert_eq!(score.method, "llm_judge");
        assert!((score.score - 0.8).abs() < 1e-9);
        assert_eq!(score.raw_score, Some(4.0));
    }

    #[tokio::test]
    async fn empty_transcript_skips_the_judge() {
        let scorer = NaturalnessScorer::with_judge(Arc::new(FixedJudge { score: 5.0 }));
        let score = scorer.score(&TestResults::default()).await;
        assert_eq!(score.method, "heuristic");
        assert_eq!(score.score, 0.5);
    }

    #[tokio::test]
    async fn broken_judge_falls_back_to_heuristic() {
        let scorer = NaturalnessScorer::with_judge(Arc::new(BrokenJudge));
        let score = scorer.score(&talkative_results()).await;
        assert_eq!(score.method, "heuristic");
        assert!(score.diversity.is_some());
    }

    #[tokio::test]
    async fn heuristic_rewards_diversity() {
        let mut repetitive = TestResults::default();
        for _ in 0..4 {
            repetitive.record_response("I can help with that.", &[], 0.0);
        }
        let varied = talkative_results();

        let scorer = NaturalnessScorer::new();
        let repetitive_score = scorer.score(&repetitive).await;
        let varied_score = scorer.score(&varied).await;
        assert!(varied_score.score > repetitive_score.score);
    }

    #[test]
    fn transcript_interleaves_responses_and_tool_calls() {
        let mut results = talkative_results();
        results.record_tool_call("check_availability", crate::adapter::JsonMap::new(), 1.5);
        let transcript = build_transcript(&results);
        assert!(transcript.contains("System: Of course"));
        assert!(transcript.contains("Tool call: check_availability"));
        let lines: Vec<&str> = transcript.lines().collect();
        assert_eq!(lines.len(), 3);
    }
}
