//! Scenario runner: load a scenario file, drive it against the built-in
//! echo system, print a summary and emit reports.
//!
//! ```text
//! voicebench run scenarios/booking.yaml --junit results.xml --html report.html
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use voicebench_core::adapter::echo::{spawn_echo_server, EchoTurn};
use voicebench_core::adapter::transport::duplex;
use voicebench_core::adapter::wire::WireAdapter;
use voicebench_core::adapter::VoiceSystem;
use voicebench_core::eval::EvaluationHarness;
use voicebench_core::report::{HtmlReporter, JUnitWriter, RegressionDetector};
use voicebench_core::sim::audio::AudioSimulator;
use voicebench_core::sim::barge_in::BargeInSimulator;
use voicebench_core::sim::network::NetworkSimulator;
use voicebench_core::sim::noise::NoiseEngine;
use voicebench_core::sim::video::VideoSimulator;
use voicebench_core::tools::builtin::{register_general_mocks, register_hotel_booking_mocks};
use voicebench_core::{MockToolRegistry, Scenario, ScenarioOrchestrator, TestResults};

#[derive(Parser)]
#[command(name = "voicebench", about = "Voice conversation test harness", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one or more scenario files against the built-in echo system.
    Run {
        /// Scenario files (.yaml/.yml or .json).
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Pace the run in real time instead of accelerated virtual time.
        #[arg(long)]
        realtime: bool,

        /// Seed for the simulation layers' randomness.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Write a JUnit XML report to this path.
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Write an HTML summary to this path.
        #[arg(long)]
        html: Option<PathBuf>,

        /// Check results against a stored regression baseline.
        #[arg(long)]
        baseline_dir: Option<PathBuf>,

        /// Baseline name inside the baseline directory.
        #[arg(long, default_value = "latest")]
        baseline: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            scenarios,
            realtime,
            seed,
            junit,
            html,
            baseline_dir,
            baseline,
        } => {
            let mut all_results = Vec::new();
            for path in &scenarios {
                let scenario = load_scenario(path)?;
                let results = run_scenario(&scenario, realtime, seed).await?;
                print_summary(path, &results);
                all_results.push(results);
            }

            let refs: Vec<&TestResults> = all_results.iter().collect();

            let evaluation = {
                let harness = match judge_from_env() {
                    Some(judge) => EvaluationHarness::new().with_judge(judge),
                    None => EvaluationHarness::new(),
                };
                // Dimension scores over the last run; the HTML report
                // carries the per-scenario table for the rest.
                match refs.last() {
                    Some(last) => Some(harness.evaluate(last).await),
                    None => None,
                }
            };

            if let Some(path) = junit {
                let written = JUnitWriter::default().write(&refs, &path)?;
                info!(path = %written.display(), "wrote JUnit report");
            }
            if let Some(path) = html {
                let written = HtmlReporter::default().write(&refs, evaluation.as_ref(), &path)?;
                info!(path = %written.display(), "wrote HTML report");
            }

            let mut regression_failed = false;
            if let Some(dir) = baseline_dir {
                let report = RegressionDetector::new(dir).check(&refs, &baseline)?;
                for finding in &report.regressions {
                    println!(
                        "REGRESSION {}: {:.4} -> {:.4} ({:+.2}%)",
                        finding.metric, finding.baseline, finding.current, finding.delta_pct
                    );
                }
                for finding in &report.improvements {
                    println!(
                        "improvement {}: {:.4} -> {:.4} ({:+.2}%)",
                        finding.metric, finding.baseline, finding.current, finding.delta_pct
                    );
                }
                regression_failed = report.has_regression;
            }

            let all_passed = all_results.iter().all(TestResults::all_passed);
            if !all_passed || regression_failed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn judge_from_env() -> Option<Arc<dyn voicebench_core::eval::NaturalnessJudge>> {
    voicebench_core::eval::naturalness::HttpJudge::from_env()
        .map(|judge| Arc::new(judge) as Arc<dyn voicebench_core::eval::NaturalnessJudge>)
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read scenario {}", path.display()))?;
    let value: serde_json::Value = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)
            .with_context(|| format!("parse YAML scenario {}", path.display()))?,
        _ => serde_json::from_str(&raw)
            .with_context(|| format!("parse JSON scenario {}", path.display()))?,
    };
    Ok(Scenario::from_value(value)?)
}

/// Wire up the full harness around the scripted echo SUT and run once.
async fn run_scenario(scenario: &Scenario, realtime: bool, seed: u64) -> Result<TestResults> {
    let (client, server) = duplex();
    let adapter = Arc::new(WireAdapter::new(Arc::new(client)));
    let server_handle = spawn_echo_server(
        Arc::new(server),
        vec![
            EchoTurn::say("Let me check that for you.")
                .call_tool("check_availability", serde_json::json!({})),
            EchoTurn::say("Your booking is confirmed.")
                .call_tool("create_booking", serde_json::json!({ "nights": 2 })),
        ],
    );

    let registry = Arc::new(MockToolRegistry::with_seed(seed));
    register_hotel_booking_mocks(&registry);
    register_general_mocks(&registry);

    let mut orchestrator = ScenarioOrchestrator::new();
    orchestrator.set_realtime(realtime);
    adapter.set_clock(orchestrator.clock());
    orchestrator.register_audio(AudioSimulator::default());
    orchestrator.register_video(VideoSimulator::default());
    orchestrator.register_environment(NoiseEngine::with_seed("quiet_room", None, seed));
    orchestrator.register_network(NetworkSimulator::with_seed("perfect", seed));
    orchestrator.register_barge_in(BargeInSimulator::with_seed(seed));
    orchestrator.register_tools(Arc::clone(&registry));

    for tool in registry.registered_tools() {
        adapter
            .register_tool_handler(&tool, registry.handler_for(&tool))
            .await?;
    }

    adapter.connect().await?;
    let system: Arc<dyn VoiceSystem> = Arc::clone(&adapter) as Arc<dyn VoiceSystem>;
    let results = orchestrator.run(scenario, Some(system)).await?;
    adapter.disconnect().await?;
    server_handle.abort();

    Ok(results)
}

fn print_summary(path: &Path, results: &TestResults) {
    let passed = results.assertions.iter().filter(|a| a.passed).count();
    println!(
        "{}: {} — {passed}/{} assertions, {} responses, {} tool calls, p50 {:.0} ms",
        path.display(),
        if results.all_passed() { "PASS" } else { "FAIL" },
        results.assertions.len(),
        results.responses.len(),
        results.tool_calls.calls.len(),
        results.latency.p50_first_byte(),
    );
    for assertion in results.assertions.iter().filter(|a| !a.passed) {
        println!("  failed @ {:.2}s: {}", assertion.timestamp, assertion.description);
    }
}
