//! Single-file HTML summary: pass counts plus aggregated dimension scores.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;
use crate::eval::EvaluationReport;
use crate::results::TestResults;

const STYLE: &str = "\
  :root { --bg: #F5F3EE; --card: #fff; --accent: #e94560; --text: #1a1a2e; }
  * { box-sizing: border-box; margin: 0; padding: 0; }
  body { font-family: 'Inter', system-ui, sans-serif; background: var(--bg);
         color: var(--text); line-height: 1.6; }
  .container { max-width: 960px; margin: 0 auto; padding: 24px; }
  header { background: var(--text); color: #fff; padding: 32px 0;
           border-bottom: 4px solid var(--accent); margin-bottom: 24px; }
  header h1 { font-size: 24px; font-weight: 700; }
  header .meta { font-size: 13px; color: #aaa; margin-top: 6px; }
  .card { background: var(--card); border-radius: 12px; padding: 20px;
          border: 1px solid #e0ddd5; margin-bottom: 20px; }
  .card h2 { font-size: 16px; margin-bottom: 12px; }
  .badge { display: inline-block; padding: 3px 10px; border-radius: 20px;
           font-size: 12px; font-weight: 600; }
  .badge.pass { background: #d4edda; color: #155724; }
  .badge.fail { background: #f8d7da; color: #721c24; }
  table { width: 100%; border-collapse: collapse; font-size: 13px; }
  th, td { text-align: left; padding: 8px 12px; border-bottom: 1px solid #eee; }
  th { font-weight: 600; color: #666; }
  .dimension { display: grid;
               grid-template-columns: repeat(auto-fill, minmax(200px, 1fr));
               gap: 14px; }
  .dim-card { padding: 16px; border-radius: 10px; background: #f9f7f2;
              border: 1px solid #e8e4db; }
  .dim-card .label { font-size: 12px; color: #888; }
  .dim-card .value { font-size: 22px; font-weight: 700; margin-top: 4px; }
";

pub struct HtmlReporter {
    title: String,
}

impl Default for HtmlReporter {
    fn default() -> Self {
        Self::new("Voicebench Report")
    }
}

impl HtmlReporter {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    pub fn write(
        &self,
        all_results: &[&TestResults],
        evaluation: Option<&EvaluationReport>,
        output_path: &Path,
    ) -> Result<PathBuf> {
        let document = self.render(all_results, evaluation);
        std::fs::write(output_path, document)?;
        Ok(output_path.to_path_buf())
    }

    pub fn render(
        &self,
        all_results: &[&TestResults],
        evaluation: Option<&EvaluationReport>,
    ) -> String {
        let total = all_results.len();
        let passed = all_results.iter().filter(|r| r.passed()).count();
        let failed = total - passed;
        let pass_rate = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let mut scenario_rows = String::new();
        for (i, results) in all_results.iter().enumerate() {
            let name = results
                .metadata
                .get("scenario_name")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .unwrap_or_else(|| format!("scenario_{i}"));
            let badge = if results.passed() {
                "<span class=\"badge pass\">pass</span>"
            } else {
                "<span class=\"badge fail\">fail</span>"
            };
            let assertions_passed = results.assertions.iter().filter(|a| a.passed).count();
            let _ = write!(
                scenario_rows,
                "<tr><td>{}</td><td>{}</td><td>{}/{}</td><td>{}</td><td>{:.0} ms</td></tr>",
                escape(&name),
                badge,
                assertions_passed,
                results.assertions.len(),
                results.tool_calls.calls.len(),
                results.latency.p50_first_byte(),
            );
        }

        let mut dimension_cards = String::new();
        if let Some(report) = evaluation {
            for (label, score) in [
                ("Overall", report.overall_score),
                ("Latency", report.latency.score),
                ("Accuracy", report.accuracy.score),
                ("Naturalness", report.naturalness.score),
                ("Tool use", report.tool_use.score),
            ] {
                let _ = write!(
                    dimension_cards,
                    "<div class=\"dim-card\"><div class=\"label\">{label}</div>\
                     <div class=\"value\">{:.2}</div></div>",
                    score,
                );
            }
        }
        let dimension_section = if dimension_cards.is_empty() {
            String::new()
        } else {
            format!(
                "<div class=\"card\"><h2>Dimension scores</h2>\
                 <div class=\"dimension\">{dimension_cards}</div></div>"
            )
        };

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n\
             <header><div class=\"container\"><h1>{title}</h1>\
             <div class=\"meta\">Generated {timestamp} &middot; {total} scenario(s)</div>\
             </div></header>\n<div class=\"container\">\n\
             <div class=\"card\"><h2>Summary</h2><div class=\"dimension\">\
             <div class=\"dim-card\"><div class=\"label\">Total</div><div class=\"value\">{total}</div></div>\
             <div class=\"dim-card\"><div class=\"label\">Passed</div><div class=\"value\" style=\"color:#155724;\">{passed}</div></div>\
             <div class=\"dim-card\"><div class=\"label\">Failed</div><div class=\"value\" style=\"color:#721c24;\">{failed}</div></div>\
             <div class=\"dim-card\"><div class=\"label\">Pass Rate</div><div class=\"value\">{pass_rate:.0}%</div></div>\
             </div></div>\n{dimension_section}\n\
             <div class=\"card\"><h2>Scenarios</h2><table>\
             <tr><th>Scenario</th><th>Status</th><th>Assertions</th><th>Tool calls</th><th>p50 first byte</th></tr>\
             {scenario_rows}</table></div>\n</div>\n</body>\n</html>\n",
            title = escape(&self.title),
            timestamp = Utc::now().to_rfc3339(),
        )
    }
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
