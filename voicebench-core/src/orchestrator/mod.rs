//! Scenario orchestration core.
//!
//! ## Run loop
//!
//! ```text
//! Scenario ──► priority queue (timestamp, seq)
//!                    │ pop earliest
//!                    ▼
//!            clock.advance_to(t) ──► dispatch(action)
//!                    │                    │
//!                    │        audio ──► noise mix ──► network ──► SUT
//!                    │
//!            response collector (concurrent) ──► TestResults
//! ```
//!
//! Dispatch errors are captured as failed assertions at the event's
//! timestamp; the run continues. The collector is cancelled once the
//! queue drains.

pub mod scenario;

use std::cmp::Ordering as CmpOrdering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{JsonMap, ResponsePayload, VoiceSystem};
use crate::clock::{SharedClock, SimulatedClock};
use crate::error::{HarnessError, Result};
use crate::results::{AssertionResult, TestResults};
use crate::sim::audio::{AudioSimulator, SpeechStyle};
use crate::sim::barge_in::BargeInSimulator;
use crate::sim::network::NetworkSimulator;
use crate::sim::noise::NoiseEngine;
use crate::sim::video::{VideoRequest, VideoSimulator};
use crate::tools::registry::MockToolRegistry;

pub use scenario::{parse_time, EnvironmentSpec, NetworkSpec, Scenario, TimelineEntry};

/// Default wait on an `expect_tool_call` event.
const DEFAULT_TOOL_TIMEOUT_MS: f64 = 5000.0;

/// A single scheduled event, ordered by `(timestamp, seq)`.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub timestamp: f64,
    /// Tie-breaker preserving insertion order among equal timestamps.
    pub seq: u64,
    pub action: String,
    pub params: JsonMap,
}

impl PartialEq for TimelineEvent {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.seq == other.seq
    }
}

impl Eq for TimelineEvent {}

impl PartialOrd for TimelineEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimelineEvent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then(self.seq.cmp(&other.seq))
    }
}

/// The pluggable simulation layers, keyed by their canonical names.
#[derive(Default)]
pub struct Layers {
    pub audio: Option<AudioSimulator>,
    pub video: Option<VideoSimulator>,
    pub environment: Option<NoiseEngine>,
    pub network: Option<NetworkSimulator>,
    pub barge_in: Option<BargeInSimulator>,
    pub tools: Option<Arc<MockToolRegistry>>,
}

/// The central scheduler driving all simulation layers along a timeline.
pub struct ScenarioOrchestrator {
    clock: SharedClock,
    layers: Layers,
    timeline: BinaryHeap<Reverse<TimelineEvent>>,
    seq: u64,
}

impl Default for ScenarioOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioOrchestrator {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SimulatedClock::new()),
            layers: Layers::default(),
            timeline: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }

    /// Run in real time instead of accelerated virtual time.
    pub fn set_realtime(&self, enabled: bool) {
        self.clock.set_realtime(enabled);
    }

    // ── layer registration ──────────────────────────────────────────────

    pub fn register_audio(&mut self, mut layer: AudioSimulator) {
        layer.set_clock(self.clock());
        self.layers.audio = Some(layer);
    }

    pub fn register_video(&mut self, mut layer: VideoSimulator) {
        layer.set_clock(self.clock());
        self.layers.video = Some(layer);
    }

    pub fn register_environment(&mut self, mut layer: NoiseEngine) {
        layer.set_clock(self.clock());
        self.layers.environment = Some(layer);
    }

    pub fn register_network(&mut self, mut layer: NetworkSimulator) {
        layer.set_clock(self.clock());
        self.layers.network = Some(layer);
    }

    pub fn register_barge_in(&mut self, mut layer: BargeInSimulator) {
        layer.set_clock(self.clock());
        self.layers.barge_in = Some(layer);
    }

    pub fn register_tools(&mut self, registry: Arc<MockToolRegistry>) {
        registry.set_clock(self.clock());
        self.layers.tools = Some(registry);
    }

    pub fn layers(&self) -> &Layers {
        &self.layers
    }

    // ── running a scenario ──────────────────────────────────────────────

    /// Execute a complete scenario against `system`.
    pub async fn run(
        &mut self,
        scenario: &Scenario,
        system: Option<Arc<dyn VoiceSystem>>,
    ) -> Result<TestResults> {
        if let Some(environment) = &scenario.environment {
            self.apply_environment(environment);
        }
        self.enqueue_timeline(&scenario.timeline, None)?;

        let results = Arc::new(Mutex::new(TestResults::default()));
        if let Some(name) = &scenario.name {
            results
                .lock()
                .metadata
                .insert("scenario_name".into(), json!(name));
        }

        // An empty timeline returns without ever touching the adapter.
        let collector: Option<JoinHandle<()>> = match (&system, self.timeline.is_empty()) {
            (Some(system), false) => Some(tokio::spawn(collect_responses(
                Arc::clone(system),
                self.clock(),
                Arc::clone(&results),
            ))),
            _ => None,
        };

        while let Some(Reverse(event)) = self.timeline.pop() {
            self.clock.advance_to(event.timestamp).await;
            debug!(
                at = event.timestamp,
                seq = event.seq,
                action = event.action.as_str(),
                "dispatching timeline event"
            );

            if let Err(error) = self.dispatch(&event, system.as_deref(), &results).await {
                warn!(action = event.action.as_str(), %error, "event dispatch failed");
                results.lock().add(
                    AssertionResult::fail(
                        event.timestamp,
                        format!("Exception in {}", event.action),
                    )
                    .with_actual(json!(error.to_string())),
                );
            }
        }

        if let Some(handle) = collector {
            handle.abort();
            let _ = handle.await;
        }

        let results = Arc::try_unwrap(results)
            .map(Mutex::into_inner)
            .unwrap_or_else(|shared| shared.lock().clone());
        info!(
            assertions = results.assertions.len(),
            responses = results.responses.len(),
            tool_calls = results.tool_calls.calls.len(),
            passed = results.all_passed(),
            "scenario run complete"
        );
        Ok(results)
    }

    // ── event dispatch ──────────────────────────────────────────────────

    async fn dispatch(
        &mut self,
        event: &TimelineEvent,
        system: Option<&dyn VoiceSystem>,
        results: &Arc<Mutex<TestResults>>,
    ) -> Result<()> {
        let params = &event.params;

        match event.action.as_str() {
            "user_speak" => {
                let Layers {
                    audio,
                    environment,
                    network,
                    ..
                } = &mut self.layers;
                let Some(audio) = audio.as_ref() else {
                    return Ok(());
                };

                let style: SpeechStyle = params
                    .get("speech_style")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()
                    .map_err(|e| HarnessError::Config(format!("speech_style: {e}")))?
                    .unwrap_or_default();
                let text = params.get("audio").and_then(Value::as_str);
                let audio_file = params
                    .get("audio_file")
                    .and_then(Value::as_str)
                    .map(PathBuf::from);

                let mut stream = audio
                    .generate(text, audio_file.as_deref(), &style)
                    .await?;

                while let Some(chunk) = stream.next().await {
                    let Some(system) = system else { continue };

                    let chunk = match environment.as_mut() {
                        Some(noise) => noise.mix_with_speech(&chunk),
                        None => chunk,
                    };
                    let chunk = match network.as_mut() {
                        Some(net) => match net.apply(chunk).await {
                            Some(chunk) => chunk,
                            None => continue, // packet lost
                        },
                        None => chunk,
                    };
                    system.push_audio(chunk).await?;
                }

                if let Some(system) = system {
                    system.commit_audio().await?;
                }
            }

            "inject_noise" => {
                if let Some(noise) = self.layers.environment.as_mut() {
                    noise.inject(
                        params
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("transient"),
                        params.get("source").and_then(Value::as_str),
                    );
                }
            }

            "inject_video" => {
                let Some(video) = self.layers.video.as_ref() else {
                    return Ok(());
                };
                let Some(system) = system else {
                    return Ok(());
                };
                let request = VideoRequest::from_params(&Value::Object(params.clone()));
                let mut stream = video.generate(&request);
                while let Some(frame) = stream.next().await {
                    system.push_video(frame).await?;
                }
            }

            "assert_system" => {
                let expect = params
                    .get("expect")
                    .cloned()
                    .unwrap_or(Value::Object(JsonMap::new()));
                let assertion = evaluate_assertion(&expect, event.timestamp);
                results.lock().add(assertion);
            }

            "expect_tool_call" => {
                let Some(tools) = self.layers.tools.as_ref() else {
                    return Ok(());
                };
                let tool = params.get("tool").and_then(Value::as_str).unwrap_or("");
                let expected_args = match params.get("args_contain") {
                    Some(Value::Object(map)) => Some(map.clone()),
                    _ => None,
                };
                let timeout_ms = params
                    .get("timeout_ms")
                    .and_then(Value::as_f64)
                    .unwrap_or(DEFAULT_TOOL_TIMEOUT_MS);

                let assertion = tools
                    .wait_for_call(
                        tool,
                        expected_args.as_ref(),
                        Duration::from_secs_f64(timeout_ms.max(0.0) / 1000.0),
                    )
                    .await;
                results.lock().add(assertion);
            }

            "barge_in" => {
                let Layers {
                    audio, barge_in, ..
                } = &mut self.layers;
                let Some(barge_in) = barge_in.as_mut() else {
                    return Ok(());
                };
                let Some(system) = system else {
                    return Ok(());
                };

                let pattern = params
                    .get("pattern")
                    .and_then(Value::as_str)
                    .unwrap_or("eager_interrupt");
                let correction = params
                    .get("correction")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let question = params.get("question").and_then(Value::as_str).unwrap_or("");

                let mut stream = system.response_stream();
                let interrupt = barge_in
                    .simulate(
                        pattern,
                        Some(&mut stream),
                        audio.as_ref(),
                        correction,
                        question,
                    )
                    .await?;

                let mut results = results.lock();
                results.barge_in.was_handled = true;
                results.barge_in.response_latency = interrupt.timestamp;
            }

            "conditional" => {
                let condition = params
                    .get("condition")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let branches: HashMap<String, Vec<TimelineEntry>> = params
                    .get("branches")
                    .map(|v| serde_json::from_value(v.clone()))
                    .transpose()
                    .map_err(|e| HarnessError::Config(format!("conditional branches: {e}")))?
                    .unwrap_or_default();

                let branch = eval_condition(condition);
                if let Some(entries) = branches.get(branch) {
                    debug!(branch, entries = entries.len(), "expanding conditional");
                    self.enqueue_timeline(entries, Some(event.timestamp))?;
                } else {
                    debug!(branch, "conditional has no matching branch");
                }
            }

            "wait" => {
                let duration_ms = params
                    .get("duration_ms")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                self.clock.advance_by(duration_ms / 1000.0).await;
            }

            "set_network" => {
                if let Some(net) = self.layers.network.as_mut() {
                    net.set_profile(
                        params
                            .get("profile")
                            .and_then(Value::as_str)
                            .unwrap_or("perfect"),
                    );
                }
            }

            other => {
                warn!(action = other, "unknown action — skipping");
            }
        }

        Ok(())
    }

    // ── helpers ─────────────────────────────────────────────────────────

    fn apply_environment(&mut self, environment: &EnvironmentSpec) {
        if let Some(noise) = self.layers.environment.as_mut() {
            if let Some(profile) = &environment.noise_profile {
                noise.set_profile(profile, environment.noise_snr_db);
            } else if let Some(snr) = environment.noise_snr_db {
                noise.set_snr(snr);
            }
        }

        if let (Some(net), Some(spec)) = (self.layers.network.as_mut(), &environment.network) {
            net.configure(Some(spec.latency_ms), Some(spec.jitter_ms), Some(spec.loss));
        }
    }

    /// Parse raw entries and push them onto the queue. With `base` set
    /// (conditional expansion) timestamps resolve relative to it and are
    /// clamped so expansion never schedules into the past.
    fn enqueue_timeline(&mut self, entries: &[TimelineEntry], base: Option<f64>) -> Result<()> {
        for entry in entries {
            let mut timestamp = parse_time(&entry.at, base)?;
            if let Some(base) = base {
                timestamp = timestamp.max(base);
            }
            self.seq += 1;
            self.timeline.push(Reverse(TimelineEvent {
                timestamp,
                seq: self.seq,
                action: entry.action.clone(),
                params: entry.params.clone(),
            }));
        }
        Ok(())
    }
}

/// Evaluate a condition string to a branch key.
///
/// Minimal grammar: everything resolves to `default` except the literal
/// `branch:<key>` form, which selects `<key>`.
fn eval_condition(condition: &str) -> &str {
    condition.strip_prefix("branch:").unwrap_or("default")
}

/// Build the vacuous-pass assertion for an `assert_system` event.
///
/// The expectation (`intent`, `did_not`, any future keys) is recorded but
/// no SUT state is queried; the real verification surface is
/// `expect_tool_call`, barge-in and the scored metrics.
fn evaluate_assertion(expect: &Value, timestamp: f64) -> AssertionResult {
    let mut details = JsonMap::new();
    if let Some(intent) = expect.get("intent") {
        details.insert("expected_intent".into(), intent.clone());
    }
    if let Some(did_not) = expect.get("did_not") {
        details.insert("did_not".into(), did_not.clone());
    }

    AssertionResult::pass(timestamp, format!("assert_system @ {timestamp}s"))
        .with_expected(expect.clone())
        .with_actual(Value::Object(details))
}

/// Background task recording all SUT responses into the results.
async fn collect_responses(
    system: Arc<dyn VoiceSystem>,
    clock: SharedClock,
    results: Arc<Mutex<TestResults>>,
) {
    let mut stream = system.response_stream();
    while let Some(event) = stream.next().await {
        let now = clock.now();
        match event.payload {
            ResponsePayload::Text { text } => {
                results.lock().record_response(&text, &[], now);
            }
            ResponsePayload::Audio { bytes } => {
                let mut results = results.lock();
                results.record_response("", &bytes, now);
                results.latency.first_byte_latencies.push(now * 1000.0);
            }
            ResponsePayload::ToolCall { name, args, .. } => {
                results.lock().record_tool_call(&name, args, now);
            }
            // State changes, tool results and errors are scored indirectly.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(at: Value, action: &str, params: Value) -> TimelineEntry {
        let params = match params {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        };
        TimelineEntry {
            at,
            action: action.into(),
            params,
        }
    }

    #[test]
    fn events_order_by_timestamp_then_seq() {
        let mut heap = BinaryHeap::new();
        for (timestamp, seq) in [(2.0, 1), (1.0, 2), (1.0, 3), (0.5, 4)] {
            heap.push(Reverse(TimelineEvent {
                timestamp,
                seq,
                action: String::new(),
                params: JsonMap::new(),
            }));
        }
        let order: Vec<(f64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|Reverse(e)| (e.timestamp, e.seq))
            .collect();
        assert_eq!(order, vec![(0.5, 4), (1.0, 2), (1.0, 3), (2.0, 1)]);
    }

    #[tokio::test]
    async fn empty_timeline_returns_empty_results() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let results = orchestrator
            .run(&Scenario::default(), None)
            .await
            .expect("run");
        assert!(results.assertions.is_empty());
        assert!(results.responses.is_empty());
        assert!(results.tool_calls.calls.is_empty());
    }

    #[tokio::test]
    async fn clock_matches_event_time_at_dispatch() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![
                entry(json!("500ms"), "assert_system", json!({ "expect": {} })),
                entry(json!("2s"), "assert_system", json!({ "expect": {} })),
            ],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        assert_eq!(results.assertions.len(), 2);
        assert_eq!(results.assertions[0].timestamp, 0.5);
        assert_eq!(results.assertions[1].timestamp, 2.0);
        assert_eq!(orchestrator.clock.now(), 2.0);
    }

    #[tokio::test]
    async fn insertion_order_breaks_timestamp_ties() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![
                entry(json!("1s"), "assert_system", json!({ "expect": { "intent": "first" } })),
                entry(json!("1s"), "assert_system", json!({ "expect": { "intent": "second" } })),
            ],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        let intents: Vec<&Value> = results
            .assertions
            .iter()
            .map(|a| &a.expected.as_ref().unwrap()["intent"])
            .collect();
        assert_eq!(intents, vec![&json!("first"), &json!("second")]);
    }

    #[tokio::test]
    async fn wait_advances_the_clock() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![entry(json!(0), "wait", json!({ "duration_ms": 1500 }))],
        };
        orchestrator.run(&scenario, None).await.expect("run");
        assert_eq!(orchestrator.clock.now(), 1.5);
    }

    #[tokio::test]
    async fn unknown_actions_are_skipped_without_failures() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![entry(json!(0), "levitate", json!({}))],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        assert!(results.assertions.is_empty());
    }

    #[tokio::test]
    async fn conditional_default_branch_expands_relative_to_event() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![
                entry(json!(0), "assert_system", json!({ "expect": {} })),
                entry(
                    json!("1s"),
                    "conditional",
                    json!({
                        "condition": "",
                        "branches": {
                            "default": [
                                { "at": "+1s", "action": "assert_system", "expect": {} },
                            ],
                        },
                    }),
                ),
            ],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        assert_eq!(results.assertions.len(), 2);
        assert_eq!(results.assertions[1].timestamp, 2.0);
    }

    #[tokio::test]
    async fn conditional_branch_escape_hatch_selects_named_branch() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![entry(
                json!(0),
                "conditional",
                json!({
                    "condition": "branch:fallback",
                    "branches": {
                        "default": [
                            { "at": "+1s", "action": "assert_system", "expect": {} },
                            { "at": "+2s", "action": "assert_system", "expect": {} },
                        ],
                        "fallback": [
                            { "at": "+1s", "action": "assert_system", "expect": {} },
                        ],
                    },
                }),
            )],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        assert_eq!(results.assertions.len(), 1);
    }

    #[tokio::test]
    async fn conditional_expansion_never_schedules_into_the_past() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![entry(
                json!("2s"),
                "conditional",
                json!({
                    "condition": "",
                    "branches": {
                        "default": [
                            { "at": "0s", "action": "assert_system", "expect": {} },
                        ],
                    },
                }),
            )],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        assert_eq!(results.assertions.len(), 1);
        assert_eq!(results.assertions[0].timestamp, 2.0, "clamped to the conditional");
    }

    #[tokio::test]
    async fn bad_time_string_fails_the_run_as_config_error() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![entry(json!("whenever"), "wait", json!({}))],
        };
        let error = orchestrator
            .run(&scenario, None)
            .await
            .expect_err("bad time must not run");
        assert!(matches!(error, HarnessError::Config(_)));
    }

    #[tokio::test]
    async fn expect_tool_call_timeout_records_failed_assertion() {
        let mut orchestrator = ScenarioOrchestrator::new();
        orchestrator.register_tools(Arc::new(MockToolRegistry::new()));
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![entry(
                json!(0),
                "expect_tool_call",
                json!({ "tool": "create_booking", "timeout_ms": 0 }),
            )],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        assert_eq!(results.assertions.len(), 1);
        assert!(!results.assertions[0].passed);
        assert!(results.assertions[0]
            .description
            .contains("Timeout waiting for tool"));
    }

    #[tokio::test]
    async fn assert_system_records_expectation_and_passes() {
        let mut orchestrator = ScenarioOrchestrator::new();
        let scenario = Scenario {
            name: None,
            environment: None,
            timeline: vec![entry(
                json!(0),
                "assert_system",
                json!({ "expect": { "intent": "book_room", "did_not": ["hang_up"] } }),
            )],
        };
        let results = orchestrator.run(&scenario, None).await.expect("run");
        let assertion = &results.assertions[0];
        assert!(assertion.passed);
        assert_eq!(
            assertion.expected.as_ref().unwrap()["intent"],
            json!("book_room")
        );
        assert_eq!(
            assertion.actual.as_ref().unwrap()["expected_intent"],
            json!("book_room")
        );
    }

    #[tokio::test]
    async fn environment_spec_configures_layers() {
        let mut orchestrator = ScenarioOrchestrator::new();
        orchestrator.register_environment(NoiseEngine::default());
        orchestrator.register_network(NetworkSimulator::default());

        let scenario = Scenario {
            name: None,
            environment: Some(EnvironmentSpec {
                noise_profile: Some("cafe".into()),
                noise_snr_db: Some(12.0),
                network: Some(NetworkSpec {
                    latency_ms: 80.0,
                    jitter_ms: 5.0,
                    loss: 0.2,
                }),
            }),
            timeline: vec![],
        };
        orchestrator.run(&scenario, None).await.expect("run");

        let noise = orchestrator.layers().environment.as_ref().unwrap();
        assert_eq!(noise.ambient().name, "cafe");
        assert_eq!(noise.ambient().snr_db, 12.0);
        let net = orchestrator.layers().network.as_ref().unwrap();
        assert_eq!(net.base_latency_ms, 80.0);
        assert_eq!(net.loss_rate, 0.2);
    }
}
