//! Accumulated outcomes of a single scenario run.
//!
//! `TestResults` is written by the orchestrator (assertions), the response
//! collector (responses, first-byte latencies, tool calls) and read by the
//! scorers once the run has finished. Everything is append-only.

use serde::Serialize;
use serde_json::Value;

use crate::adapter::JsonMap;

/// Outcome of a single assertion at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct AssertionResult {
    pub timestamp: f64,
    pub passed: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

impl AssertionResult {
    pub fn pass(timestamp: f64, description: impl Into<String>) -> Self {
        Self {
            timestamp,
            passed: true,
            description: description.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn fail(timestamp: f64, description: impl Into<String>) -> Self {
        Self {
            timestamp,
            passed: false,
            description: description.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_actual(mut self, actual: Value) -> Self {
        self.actual = Some(actual);
        self
    }
}

/// Metrics collected during a barge-in event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BargeInResult {
    pub was_handled: bool,
    pub response_latency: f64,
    pub system_stopped_speaking: bool,
}

/// Latency metrics gathered during a run. Values are milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyMetrics {
    pub first_byte_latencies: Vec<f64>,
    pub turn_gaps: Vec<f64>,
}

impl LatencyMetrics {
    pub fn p50_first_byte(&self) -> f64 {
        percentile(&self.first_byte_latencies, 0.50)
    }

    pub fn p99_first_byte(&self) -> f64 {
        percentile(&self.first_byte_latencies, 0.99)
    }

    pub fn turn_gap_avg(&self) -> f64 {
        if self.turn_gaps.is_empty() {
            0.0
        } else {
            self.turn_gaps.iter().sum::<f64>() / self.turn_gaps.len() as f64
        }
    }
}

/// Sorted-index percentile: `⌊n·q⌋` clamped to the last element.
/// Returns 0 on an empty sample.
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let idx = ((sorted.len() as f64) * q) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AccuracyMetrics {
    pub intent_recognition: f64,
    pub entity_extraction: f64,
    pub visual_grounding: f64,
    pub overall: f64,
}

/// Single recorded tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: JsonMap,
    pub timestamp: f64,
    pub success: bool,
    pub latency_ms: f64,
}

/// Aggregated tool-call records with assertion conveniences.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCallLog {
    pub calls: Vec<ToolCallRecord>,
}

impl ToolCallLog {
    pub fn assert_called(&self, tool_name: &str) -> bool {
        self.calls.iter().any(|c| c.tool == tool_name)
    }

    pub fn assert_not_called(&self, tool_name: &str) -> bool {
        !self.assert_called(tool_name)
    }

    /// True when `tool_names` occur in order as a subsequence of the log.
    pub fn assert_call_order(&self, tool_names: &[&str]) -> bool {
        let mut idx = 0;
        for expected in tool_names {
            loop {
                match self.calls.get(idx) {
                    Some(record) => {
                        idx += 1;
                        if record.tool == *expected {
                            break;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }
}

/// A single captured response from the system under test.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseRecord {
    pub text: String,
    #[serde(skip)]
    pub audio: Vec<u8>,
    pub timestamp: f64,
}

/// Container for everything gathered during one scenario run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestResults {
    pub assertions: Vec<AssertionResult>,
    pub latency: LatencyMetrics,
    pub accuracy: AccuracyMetrics,
    pub tool_calls: ToolCallLog,
    pub barge_in: BargeInResult,
    pub responses: Vec<ResponseRecord>,
    pub tags: Vec<String>,
    pub metadata: JsonMap,
}

impl TestResults {
    pub fn add(&mut self, result: AssertionResult) {
        self.assertions.push(result);
    }

    pub fn all_passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }

    pub fn passed(&self) -> bool {
        self.all_passed()
    }

    pub fn last_response(&self) -> Option<&ResponseRecord> {
        self.responses.last()
    }

    pub fn tag(&mut self, label: impl Into<String>) {
        self.tags.push(label.into());
    }

    pub fn record_response(&mut self, text: &str, audio: &[u8], timestamp: f64) {
        self.responses.push(ResponseRecord {
            text: text.to_owned(),
            audio: audio.to_vec(),
            timestamp,
        });
    }

    pub fn record_tool_call(&mut self, tool: &str, args: JsonMap, timestamp: f64) {
        self.tool_calls.calls.push(ToolCallRecord {
            tool: tool.to_owned(),
            args,
            timestamp,
            success: true,
            latency_ms: 0.0,
        });
    }
}
