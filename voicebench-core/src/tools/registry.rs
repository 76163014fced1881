//! Mock tool registry: simulates external tool responses with latency and
//! failure injection, keeps an append-only call log, and satisfies
//! test-side `wait_for_call` expectations.
//!
//! ## Signaling protocol
//!
//! `wait_for_call` registers an expectation and suspends; `handle_call`
//! appends the call record and signals every matching expectation *before*
//! its latency sleep, so a waiting assertion unblocks on call arrival, not
//! on call completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::Notify;
use tracing::debug;

use crate::adapter::{JsonMap, ToolHandler, ToolOutcome};
use crate::clock::SharedClock;
use crate::results::AssertionResult;

/// Default latency range sampled for a mock invocation (milliseconds).
const DEFAULT_LATENCY_MS: (f64, f64) = (100.0, 500.0);
const DEFAULT_FAILURE_ERROR: &str = "ServiceUnavailable";

/// Configuration for a single mock tool.
pub struct ToolMock {
    handler: Arc<dyn ToolHandler>,
    latency_ms: (f64, f64),
    failure_rate: f64,
    failure_error: String,
}

impl ToolMock {
    pub fn new(handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            handler,
            latency_ms: DEFAULT_LATENCY_MS,
            failure_rate: 0.0,
            failure_error: DEFAULT_FAILURE_ERROR.into(),
        }
    }

    pub fn latency_ms(mut self, low: f64, high: f64) -> Self {
        self.latency_ms = (low, high);
        self
    }

    pub fn failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    pub fn failure_error(mut self, error: impl Into<String>) -> Self {
        self.failure_error = error.into();
        self
    }
}

/// One appended call-log entry.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub tool: String,
    pub args: JsonMap,
    pub timestamp: f64,
}

struct Expectation {
    id: u64,
    tool_name: String,
    signal: Arc<Notify>,
}

/// Mocks every external tool a voice system might call.
///
/// Simulates not only successes but also failures, latency, and unknown
/// tools — the cases that matter most against production systems.
pub struct MockToolRegistry {
    tools: Mutex<HashMap<String, ToolMock>>,
    call_log: Mutex<Vec<CallRecord>>,
    pending: Mutex<Vec<Expectation>>,
    clock: Mutex<Option<SharedClock>>,
    rng: Mutex<StdRng>,
    next_expectation: AtomicU64,
}

impl Default for MockToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockToolRegistry {
    pub fn new() -> Self {
        Self::with_seed(0x5eed)
    }

    /// Deterministic registry: latency and failure draws replay for a
    /// given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
            call_log: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            clock: Mutex::new(None),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            next_expectation: AtomicU64::new(0),
        }
    }

    pub fn set_clock(&self, clock: SharedClock) {
        *self.clock.lock() = Some(clock);
    }

    fn now(&self) -> f64 {
        self.clock.lock().as_ref().map_or(0.0, |c| c.now())
    }

    async fn pace_ms(&self, ms: f64) {
        let clock = self.clock.lock().clone();
        match clock {
            Some(clock) => clock.sleep(ms / 1000.0).await,
            None => tokio::time::sleep(Duration::from_secs_f64(ms.max(0.0) / 1000.0)).await,
        }
    }

    /// Install or replace a mock.
    pub fn register(&self, name: &str, mock: ToolMock) {
        self.tools.lock().insert(name.to_owned(), mock);
    }

    pub fn registered_tools(&self) -> Vec<String> {
        self.tools.lock().keys().cloned().collect()
    }

    /// Snapshot of the call log, in call order.
    pub fn call_log(&self) -> Vec<CallRecord> {
        self.call_log.lock().clone()
    }

    /// Handle a tool call from the system under test.
    pub async fn handle_call(&self, tool_name: &str, args: JsonMap) -> ToolOutcome {
        let timestamp = self.now();
        self.call_log.lock().push(CallRecord {
            tool: tool_name.to_owned(),
            args: args.clone(),
            timestamp,
        });

        // Signal before the latency sleep so waiters see the arrival.
        let signals: Vec<Arc<Notify>> = self
            .pending
            .lock()
            .iter()
            .filter(|exp| exp.tool_name == tool_name)
            .map(|exp| Arc::clone(&exp.signal))
            .collect();
        for signal in signals {
            signal.notify_one();
        }

        let (handler, latency_range, failure_rate, failure_error) = {
            let tools = self.tools.lock();
            match tools.get(tool_name) {
                Some(mock) => (
                    Arc::clone(&mock.handler),
                    mock.latency_ms,
                    mock.failure_rate,
                    mock.failure_error.clone(),
                ),
                None => {
                    debug!(tool = tool_name, "call to unknown tool");
                    return ToolOutcome::err(format!("Unknown tool: {tool_name}"), 0.0);
                }
            }
        };

        let (latency, failed) = {
            let mut rng = self.rng.lock();
            let latency = if latency_range.1 > latency_range.0 {
                rng.gen_range(latency_range.0..=latency_range.1)
            } else {
                latency_range.0
            };
            let failed = failure_rate > 0.0 && rng.gen::<f64>() < failure_rate;
            (latency, failed)
        };

        self.pace_ms(latency).await;

        if failed {
            return ToolOutcome::err(failure_error, latency);
        }

        let data = handler.call(&args).await;
        ToolOutcome::ok(data, latency)
    }

    /// Wait until `tool_name` is called, or time out.
    ///
    /// A matching call already present in the log satisfies the wait
    /// immediately, which is what makes a zero timeout usable as an
    /// "already happened?" probe.
    pub async fn wait_for_call(
        &self,
        tool_name: &str,
        expected_args: Option<&JsonMap>,
        timeout: Duration,
    ) -> AssertionResult {
        let already_called = self
            .call_log
            .lock()
            .iter()
            .any(|c| c.tool == tool_name);

        if !already_called {
            let signal = Arc::new(Notify::new());
            let id = self.next_expectation.fetch_add(1, Ordering::Relaxed);
            self.pending.lock().push(Expectation {
                id,
                tool_name: tool_name.to_owned(),
                signal: Arc::clone(&signal),
            });

            let waited = tokio::time::timeout(timeout, signal.notified()).await;
            self.pending.lock().retain(|exp| exp.id != id);

            if waited.is_err() {
                return AssertionResult::fail(
                    self.now(),
                    format!("Timeout waiting for tool '{tool_name}'"),
                )
                .with_expected(json!({ "tool": tool_name, "args": expected_args }));
            }
        }

        let last_call = {
            let log = self.call_log.lock();
            log.iter().rev().find(|c| c.tool == tool_name).cloned()
        };
        let Some(last_call) = last_call else {
            return AssertionResult::fail(
                self.now(),
                format!("Tool '{tool_name}' was never called"),
            );
        };

        if let Some(expected) = expected_args {
            for (key, value) in expected {
                match last_call.args.get(key) {
                    None => {
                        return AssertionResult::fail(
                            self.now(),
                            format!("Missing arg '{key}' in {tool_name} call"),
                        )
                        .with_expected(json!(expected))
                        .with_actual(json!(last_call.args));
                    }
                    Some(actual) if actual != value => {
                        return AssertionResult::fail(
                            self.now(),
                            format!("Arg '{key}' mismatch in {tool_name} call"),
                        )
                        .with_expected(json!(expected))
                        .with_actual(json!(last_call.args));
                    }
                    Some(_) => {}
                }
            }
        }

        AssertionResult::pass(self.now(), format!("Tool '{tool_name}' called successfully"))
            .with_actual(json!(last_call.args))
    }

    /// Clear the call log.
    pub fn reset(&self) {
        self.call_log.lock().clear();
    }

    /// Build an adapter-side handler that routes `tool` into this
    /// registry, so SUT tool calls land in the call log and unblock
    /// waiting expectations.
    pub fn handler_for(self: &Arc<Self>, tool: &str) -> Arc<dyn ToolHandler> {
        Arc::new(RoutedHandler {
            registry: Arc::clone(self),
            tool: tool.to_owned(),
        })
    }
}

struct RoutedHandler {
    registry: Arc<MockToolRegistry>,
    tool: String,
}

#[async_trait::async_trait]
impl ToolHandler for RoutedHandler {
    async fn call(&self, args: &JsonMap) -> serde_json::Value {
        let outcome = self.registry.handle_call(&self.tool, args.clone()).await;
        if outcome.success {
            outcome.data
        } else {
            serde_json::json!({ "error": outcome.error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, serde_json::Value)]) -> JsonMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn weather_registry() -> MockToolRegistry {
        let registry = MockToolRegistry::with_seed(7);
        registry.register(
            "get_weather",
            ToolMock::new(Arc::new(|args: &JsonMap| {
                json!({
                    "location": args.get("location").cloned().unwrap_or(json!("Beijing")),
                    "condition": "sunny",
                })
            }))
            .latency_ms(1.0, 2.0),
        );
        registry
    }

    #[tokio::test]
    async fn handle_call_invokes_handler_and_reports_latency() {
        let registry = weather_registry();
        let outcome = registry
            .handle_call("get_weather", args(&[("location", json!("Tokyo"))]))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.data["location"], json!("Tokyo"));
        assert!(outcome.latency_ms > 0.0);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_value_not_a_panic() {
        let registry = weather_registry();
        let outcome = registry.handle_call("nonexistent", JsonMap::new()).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("Unknown tool"));
        assert_eq!(outcome.latency_ms, 0.0);
        // Unknown calls are still logged.
        assert_eq!(registry.call_log().len(), 1);
    }

    #[tokio::test]
    async fn failure_rate_one_always_fails_with_configured_error() {
        let registry = MockToolRegistry::with_seed(3);
        registry.register(
            "flaky",
            ToolMock::new(Arc::new(|_: &JsonMap| json!({})))
                .latency_ms(0.0, 0.0)
                .failure_rate(1.0)
                .failure_error("UpstreamDown"),
        );
        let outcome = registry.handle_call("flaky", JsonMap::new()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("UpstreamDown"));
    }

    #[tokio::test]
    async fn wait_unblocks_on_call_arrival() {
        let registry = Arc::new(weather_registry());
        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .wait_for_call("get_weather", None, Duration::from_secs(2))
                    .await
            })
        };
        tokio::task::yield_now().await;
        registry.handle_call("get_weather", JsonMap::new()).await;

        let assertion = waiter.await.expect("waiter panicked");
        assert!(assertion.passed, "{}", assertion.description);
    }

    #[tokio::test]
    async fn wait_times_out_into_a_failed_assertion() {
        let registry = weather_registry();
        let assertion = registry
            .wait_for_call("get_weather", None, Duration::from_millis(20))
            .await;
        assert!(!assertion.passed);
        assert!(assertion.description.contains("Timeout waiting for tool"));
        // The expectation is removed even on timeout.
        assert!(registry.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn zero_timeout_probes_the_existing_log() {
        let registry = weather_registry();
        let missed = registry
            .wait_for_call("get_weather", None, Duration::ZERO)
            .await;
        assert!(!missed.passed);

        registry
            .handle_call("get_weather", args(&[("location", json!("LA"))]))
            .await;
        let hit = registry
            .wait_for_call("get_weather", None, Duration::ZERO)
            .await;
        assert!(hit.passed);
    }

    #[tokio::test]
    async fn expected_args_must_match_by_value() {
        let registry = weather_registry();
        registry
            .handle_call("get_weather", args(&[("location", json!("LA"))]))
            .await;

        let wrong_value = registry
            .wait_for_call(
                "get_weather",
                Some(&args(&[("location", json!("NYC"))])),
                Duration::from_millis(50),
            )
            .await;
        assert!(!wrong_value.passed);
        assert!(wrong_value.description.contains("mismatch"));

        let missing_key = registry
            .wait_for_call(
                "get_weather",
                Some(&args(&[("units", json!("metric"))])),
                Duration::from_millis(50),
            )
            .await;
        assert!(!missing_key.passed);
        assert!(missing_key.description.contains("Missing arg"));

        let matching = registry
            .wait_for_call(
                "get_weather",
                Some(&args(&[("location", json!("LA"))])),
                Duration::from_millis(50),
            )
            .await;
        assert!(matching.passed);
    }

    #[tokio::test]
    async fn reset_clears_the_log_only() {
        let registry = weather_registry();
        registry.handle_call("get_weather", JsonMap::new()).await;
        assert_eq!(registry.call_log().len(), 1);

        registry.reset();
        assert!(registry.call_log().is_empty());
        assert!(registry.registered_tools().contains(&"get_weather".into()));
    }
}
