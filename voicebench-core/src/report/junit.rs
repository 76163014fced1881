//! JUnit XML report writer for CI integration (Jenkins, GitHub Actions,
//! GitLab CI). One `<testcase>` per assertion; failed assertions carry a
//! `<failure>` child with the expected/actual values rendered.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;
use crate::results::TestResults;

pub struct JUnitWriter {
    suite_name: String,
}

impl Default for JUnitWriter {
    fn default() -> Self {
        Self::new("voicebench")
    }
}

impl JUnitWriter {
    pub fn new(suite_name: impl Into<String>) -> Self {
        Self {
            suite_name: suite_name.into(),
        }
    }

    /// Render all runs into one `<testsuite>` document at `output_path`.
    pub fn write(&self, all_results: &[&TestResults], output_path: &Path) -> Result<PathBuf> {
        let document = self.render(all_results);
        std::fs::write(output_path, document)?;
        Ok(output_path.to_path_buf())
    }

    pub fn render(&self, all_results: &[&TestResults]) -> String {
        let mut cases = String::new();
        let mut total = 0usize;
        let mut failures = 0usize;

        for (i, results) in all_results.iter().enumerate() {
            let scenario_name = results
                .metadata
                .get("scenario_name")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .unwrap_or_else(|| format!("scenario_{i}"));

            for (j, assertion) in results.assertions.iter().enumerate() {
                total += 1;
                let name = if assertion.description.is_empty() {
                    format!("assertion_{j}")
                } else {
                    assertion.description.clone()
                };
                let _ = write!(
                    cases,
                    "  <testcase classname=\"{}.{}\" name=\"{}\" time=\"{:.3}\"",
                    escape(&self.suite_name),
                    escape(&scenario_name),
                    escape(&name),
                    assertion.timestamp,
                );

                if assertion.passed {
                    cases.push_str(" />\n");
                } else {
                    failures += 1;
                    let expected = assertion
                        .expected
                        .as_ref()
                        .map_or_else(|| "null".to_owned(), |v| v.to_string());
                    let actual = assertion
                        .actual
                        .as_ref()
                        .map_or_else(|| "null".to_owned(), |v| v.to_string());
                    let _ = write!(
                        cases,
                        ">\n    <failure message=\"{}\">Expected: {}\nActual: {}</failure>\n  </testcase>\n",
                        escape(&assertion.description),
                        escape(&expected),
                        escape(&actual),
                    );
                }
            }

            // A run without assertions still gets one testcase.
            if results.assertions.is_empty() {
                total += 1;
                let _ = write!(
                    cases,
                    "  <testcase classname=\"{}\" name=\"{}\"",
                    escape(&self.suite_name),
                    escape(&scenario_name),
                );
                if results.passed() {
                    cases.push_str(" />\n");
                } else {
                    failures += 1;
                    cases.push_str(
                        ">\n    <failure message=\"Scenario did not pass\" />\n  </testcase>\n",
                    );
                }
            }
        }

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <testsuite name=\"{}\" timestamp=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\">\n\
             {}</testsuite>\n",
            escape(&self.suite_name),
            Utc::now().to_rfc3339(),
            total,
            failures,
            cases,
        )
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::AssertionResult;
    use serde_json::json;

    fn sample_results() -> TestResults {
        let mut results = TestResults::default();
        results
            .metadata
            .insert("scenario_name".into(), json!("hotel_booking"));
        results.add(AssertionResult::pass(1.0, "Tool 'create_booking' called successfully"));
        results.add(
            AssertionResult::fail(3.0, "Timeout waiting for tool 'cancel_booking'")
                .with_expected(json!({ "tool": "cancel_booking" }))
                .with_actual(json!(null)),
        );
        results
    }

    #[test]
    fn suite_counts_and_failure_children() {
        let results = sample_results();
        let xml = JUnitWriter::default().render(&[&results]);
        assert!(xml.starts_with("<?xml version=\"1.0\""));
        assert!(xml.contains("tests=\"2\""));
        assert!(xml.contains("failures=\"1\""));
        assert!(xml.contains("classname=\"voicebench.hotel_booking\""));
        assert!(xml.contains("<failure message=\"Timeout waiting for tool &apos;cancel_booking&apos;\""));
        assert!(xml.contains("Expected: {&quot;tool&quot;:&quot;cancel_booking&quot;}"));
    }

    #[test]
    fn assertionless_run_emits_one_case() {
        let results = TestResults::default();
        let xml = JUnitWriter::new("suite").render(&[&results]);
        assert!(xml.contains("tests=\"1\""));
        assert!(xml.contains("failures=\"0\""));
        assert!(xml.contains("name=\"scenario_0\""));
    }

    #[test]
    fn write_round_trips_to_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("results.xml");
        let results = sample_results();
        let written = JUnitWriter::default()
            .write(&[&results], &path)
            .expect("write report");
        let content = std::fs::read_to_string(written).expect("read back");
        assert!(content.contains("</testsuite>"));
    }
}
