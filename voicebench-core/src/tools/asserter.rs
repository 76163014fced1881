//! Expressive call-log assertions over a [`MockToolRegistry`].
//!
//! Failures are `HarnessError::AssertionFailed` values rather than panics,
//! so test code can `?` them and scenario code can record them.

use serde_json::Value;

use crate::error::{HarnessError, Result};
use crate::tools::registry::{CallRecord, MockToolRegistry};

pub struct ToolCallAsserter<'a> {
    registry: &'a MockToolRegistry,
}

impl<'a> ToolCallAsserter<'a> {
    pub fn new(registry: &'a MockToolRegistry) -> Self {
        Self { registry }
    }

    fn calls_for(&self, tool_name: &str) -> Vec<CallRecord> {
        self.registry
            .call_log()
            .into_iter()
            .filter(|c| c.tool == tool_name)
            .collect()
    }

    /// Assert that `tool_name` was called, optionally with matching args.
    pub fn assert_called(
        &self,
        tool_name: &str,
        args_contain: Option<&[(&str, Value)]>,
    ) -> Result<()> {
        let calls = self.calls_for(tool_name);
        let Some(last_call) = calls.last() else {
            return Err(HarnessError::AssertionFailed(format!(
                "expected '{tool_name}' to be called, but it wasn't"
            )));
        };

        if let Some(expected) = args_contain {
            for (key, value) in expected {
                match last_call.args.get(*key) {
                    None => {
                        return Err(HarnessError::AssertionFailed(format!(
                            "missing arg '{key}' in {tool_name} call, got: {:?}",
                            last_call.args
                        )));
                    }
                    Some(actual) if actual != value => {
                        return Err(HarnessError::AssertionFailed(format!(
                            "arg '{key}' mismatch: expected {value}, got {actual}"
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Assert that `tool_name` was **not** called.
    pub fn assert_not_called(&self, tool_name: &str) -> Result<()> {
        let count = self.calls_for(tool_name).len();
        if count > 0 {
            return Err(HarnessError::AssertionFailed(format!(
                "expected '{tool_name}' NOT to be called, but it was called {count} time(s)"
            )));
        }
        Ok(())
    }

    /// Assert that the tools were called in the given order
    /// (subsequence match over the full log).
    pub fn assert_call_order(&self, tool_names: &[&str]) -> Result<()> {
        let actual: Vec<String> = self
            .registry
            .call_log()
            .into_iter()
            .map(|c| c.tool)
            .collect();
        let mut idx = 0;
        for expected in tool_names {
            loop {
                match actual.get(idx) {
                    Some(tool) => {
                        idx += 1;
                        if tool == expected {
                            break;
                        }
                    }
                    None => {
                        return Err(HarnessError::AssertionFailed(format!(
                            "expected call order {tool_names:?}, but actual order was {actual:?}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Assert `tool_name` was called exactly `times` times.
    pub fn assert_called_times(&self, tool_name: &str, times: usize) -> Result<()> {
        let count = self.calls_for(tool_name).len();
        if count != times {
            return Err(HarnessError::AssertionFailed(format!(
                "expected '{tool_name}' to be called {times} time(s), but it was called {count} time(s)"
            )));
        }
        Ok(())
    }

    /// Assert the system retried `tool_name` after failures, without
    /// exceeding `max_retries`.
    pub fn assert_retry_on_failure(&self, tool_name: &str, max_retries: usize) -> Result<()> {
        let count = self.calls_for(tool_name).len();
        if count < 2 {
            return Err(HarnessError::AssertionFailed(format!(
                "expected '{tool_name}' to be retried, but it was only called {count} time(s)"
            )));
        }
        if count > max_retries + 1 {
            return Err(HarnessError::AssertionFailed(format!(
                "'{tool_name}' was called {count} times, exceeding max retries ({max_retries})"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::JsonMap;
    use crate::tools::registry::ToolMock;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> MockToolRegistry {
        let registry = MockToolRegistry::with_seed(1);
        for name in ["check_availability", "create_booking", "get_weather"] {
            registry.register(
                name,
                ToolMock::new(Arc::new(|_: &JsonMap| json!({}))).latency_ms(0.0, 0.0),
            );
        }
        registry
    }

    #[tokio::test]
    async fn called_and_not_called() {
        let registry = registry();
        let asserter = ToolCallAsserter::new(&registry);

        asserter.assert_not_called("create_booking").expect("not called yet");

        let mut args = JsonMap::new();
        args.insert("location".into(), json!("LA"));
        registry.handle_call("get_weather", args).await;

        asserter.assert_called("get_weather", None).expect("called");
        asserter
            .assert_called("get_weather", Some(&[("location", json!("LA"))]))
            .expect("args match");
        assert!(asserter
            .assert_called("get_weather", Some(&[("location", json!("NYC"))]))
            .is_err());
        assert!(asserter.assert_called("nonexistent", None).is_err());
    }

    #[tokio::test]
    async fn order_and_counts() {
        let registry = registry();
        let asserter = ToolCallAsserter::new(&registry);

        registry.handle_call("check_availability", JsonMap::new()).await;
        registry.handle_call("create_booking", JsonMap::new()).await;
        registry.handle_call("get_weather", JsonMap::new()).await;
        registry.handle_call("get_weather", JsonMap::new()).await;

        asserter
            .assert_call_order(&["check_availability", "create_booking"])
            .expect("order holds");
        asserter
            .assert_call_order(&["check_availability", "get_weather"])
            .expect("subsequence holds");
        assert!(asserter
            .assert_call_order(&["create_booking", "check_availability"])
            .is_err());

        asserter.assert_called_times("get_weather", 2).expect("two calls");
        assert!(asserter.assert_called_times("get_weather", 1).is_err());

        asserter
            .assert_retry_on_failure("get_weather", 3)
            .expect("retried once");
        assert!(asserter.assert_retry_on_failure("create_booking", 3).is_err());
    }
}
