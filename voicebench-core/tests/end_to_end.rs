//! Full-stack scenario runs: orchestrator → simulation layers → wire
//! adapter → scripted echo system, with responses collected and scored.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;

use voicebench_core::adapter::echo::{spawn_echo_server, EchoTurn};
use voicebench_core::adapter::transport::duplex;
use voicebench_core::adapter::wire::WireAdapter;
use voicebench_core::adapter::VoiceSystem;
use voicebench_core::report::RegressionDetector;
use voicebench_core::sim::audio::AudioSimulator;
use voicebench_core::sim::barge_in::BargeInSimulator;
use voicebench_core::sim::network::NetworkSimulator;
use voicebench_core::sim::noise::NoiseEngine;
use voicebench_core::tools::registry::ToolMock;
use voicebench_core::{
    MockToolRegistry, Scenario, ScenarioOrchestrator, TestResults,
};

struct Rig {
    orchestrator: ScenarioOrchestrator,
    adapter: Arc<WireAdapter>,
    registry: Arc<MockToolRegistry>,
    _server: JoinHandle<()>,
}

/// Build a fully wired harness around a scripted echo system.
async fn rig(script: Vec<EchoTurn>, seed: u64, snr_override: Option<f64>) -> Rig {
    let (client, server) = duplex();
    let adapter = Arc::new(WireAdapter::new(Arc::new(client)));
    let server_handle = spawn_echo_server(Arc::new(server), script);

    let registry = Arc::new(MockToolRegistry::with_seed(seed));
    registry.register(
        "create_booking",
        ToolMock::new(Arc::new(|args: &voicebench_core::adapter::JsonMap| {
            json!({
                "booking_id": "BK20240115001",
                "status": "confirmed",
                "nights": args.get("nights").cloned().unwrap_or(json!(1)),
            })
        }))
        .latency_ms(5.0, 20.0),
    );

    let mut orchestrator = ScenarioOrchestrator::new();
    adapter.set_clock(orchestrator.clock());
    orchestrator.register_audio(AudioSimulator::default());
    orchestrator.register_environment(NoiseEngine::with_seed("quiet_room", snr_override, seed));
    orchestrator.register_network(NetworkSimulator::with_seed("perfect", seed));
    orchestrator.register_barge_in(BargeInSimulator::with_seed(seed));
    orchestrator.register_tools(Arc::clone(&registry));

    for tool in registry.registered_tools() {
        adapter
            .register_tool_handler(&tool, registry.handler_for(&tool))
            .await
            .expect("register handler");
    }
    adapter.connect().await.expect("connect");

    Rig {
        orchestrator,
        adapter,
        registry,
        _server: server_handle,
    }
}

fn scenario(value: serde_json::Value) -> Scenario {
    Scenario::from_value(value).expect("parse scenario")
}

fn booking_scenario(snr_db: Option<f64>) -> Scenario {
    let mut environment = json!({ "noise_profile": "quiet_room" });
    if let Some(snr_db) = snr_db {
        environment["noise_snr_db"] = json!(snr_db);
    }
    scenario(json!({
        "name": "basic_tool_call",
        "environment": environment,
        "timeline": [
            { "at": "0s", "action": "user_speak", "audio": "book a room for two nights" },
            { "at": "3s", "action": "expect_tool_call", "tool": "create_booking",
              "timeout_ms": 5000 },
        ],
    }))
}

fn booking_script() -> Vec<EchoTurn> {
    vec![EchoTurn::say("Your booking is confirmed.")
        .call_tool("create_booking", json!({ "nights": 2 }))]
}

async fn run_booking(seed: u64, snr_override: Option<f64>) -> (TestResults, Rig) {
    let mut rig = rig(booking_script(), seed, snr_override).await;
    let system: Arc<dyn VoiceSystem> = Arc::clone(&rig.adapter) as Arc<dyn VoiceSystem>;
    let results = rig
        .orchestrator
        .run(&booking_scenario(snr_override), Some(system))
        .await
        .expect("run scenario");
    (results, rig)
}

#[tokio::test]
async fn basic_tool_call_round_trip() {
    let (results, rig) = run_booking(1, None).await;

    assert_eq!(results.assertions.len(), 1);
    assert!(
        results.assertions[0].passed,
        "expectation failed: {}",
        results.assertions[0].description
    );

    // The collector saw the tool call on the response feed…
    assert_eq!(results.tool_calls.calls[0].tool, "create_booking");
    // …and the registry logged the adapter-routed invocation.
    assert_eq!(rig.registry.call_log()[0].tool, "create_booking");
    assert!(results.tool_calls.calls[0].timestamp <= rig.orchestrator.clock().now());

    // The scripted answer came back as text and echoed audio.
    assert!(results.responses.iter().any(|r| r.text.contains("confirmed")));
    assert!(results.responses.iter().any(|r| !r.audio.is_empty()));
    assert!(!results.latency.first_byte_latencies.is_empty());

    rig.adapter.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn barge_in_is_handled_and_stamped() {
    let mut rig = rig(
        vec![EchoTurn::say("We have standard rooms, king rooms, and suites available")],
        2,
        None,
    )
    .await;
    let system: Arc<dyn VoiceSystem> = Arc::clone(&rig.adapter) as Arc<dyn VoiceSystem>;

    let results = rig
        .orchestrator
        .run(
            &scenario(json!({
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "tell me about your rooms" },
                    { "at": "2s", "action": "barge_in", "pattern": "eager_interrupt" },
                ],
            })),
            Some(system),
        )
        .await
        .expect("run scenario");

    assert!(results.barge_in.was_handled);
    assert!(results.barge_in.response_latency > 0.0);
    rig.adapter.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn noise_matrix_never_crashes() {
    for snr_db in [40.0, 25.0, 15.0, 10.0, 5.0] {
        let (results, rig) = run_booking(3, Some(snr_db)).await;
        assert!(
            !results.assertions.is_empty(),
            "no assertions recorded at {snr_db} dB"
        );
        rig.adapter.disconnect().await.expect("disconnect");
    }
}

#[tokio::test]
async fn full_packet_loss_reaches_the_sut_with_nothing() {
    let mut rig = rig(Vec::new(), 4, None).await;
    let system: Arc<dyn VoiceSystem> = Arc::clone(&rig.adapter) as Arc<dyn VoiceSystem>;

    let results = rig
        .orchestrator
        .run(
            &scenario(json!({
                "environment": {
                    "network": { "latency_ms": 10, "jitter_ms": 0, "loss": 1.0 },
                },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "can you hear me at all" },
                ],
            })),
            Some(system),
        )
        .await
        .expect("run scenario");

    assert!(results.responses.is_empty());
    assert!(results.latency.first_byte_latencies.is_empty());
    rig.adapter.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn conditional_branch_adds_an_assertion() {
    let mut orchestrator = ScenarioOrchestrator::new();
    let results = orchestrator
        .run(
            &scenario(json!({
                "timeline": [
                    { "at": "0s", "action": "assert_system", "expect": { "intent": "greet" } },
                    { "at": "1s", "action": "conditional", "condition": "",
                      "branches": {
                          "default": [
                              { "at": "+1s", "action": "assert_system", "expect": {} },
                          ],
                      } },
                ],
            })),
            None,
        )
        .await
        .expect("run scenario");

    assert_eq!(results.assertions.len(), 2);
    assert_eq!(results.assertions[1].timestamp, 2.0);
}

#[tokio::test]
async fn regression_fires_on_pass_rate_drop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let detector = RegressionDetector::new(dir.path());

    let (good, rig_a) = run_booking(5, None).await;
    assert!(good.all_passed());
    detector.update_baseline(&[&good], "latest").expect("save baseline");
    rig_a.adapter.disconnect().await.expect("disconnect");

    // A run against a silent SUT times out its expectation.
    let mut silent = rig(Vec::new(), 6, None).await;
    silent.registry.register(
        "create_booking",
        ToolMock::new(Arc::new(|_: &voicebench_core::adapter::JsonMap| json!({})))
            .latency_ms(0.0, 0.0),
    );
    let system: Arc<dyn VoiceSystem> = Arc::clone(&silent.adapter) as Arc<dyn VoiceSystem>;
    let bad_scenario = scenario(json!({
        "timeline": [
            { "at": "0s", "action": "expect_tool_call", "tool": "create_booking",
              "timeout_ms": 50 },
        ],
    }));
    let bad = silent
        .orchestrator
        .run(&bad_scenario, Some(system))
        .await
        .expect("run scenario");
    assert!(!bad.all_passed());
    silent.adapter.disconnect().await.expect("disconnect");

    let report = detector.check(&[&good, &bad], "latest").expect("check");
    assert!(report.has_regression);
    assert_eq!(report.regressions[0].metric, "pass_rate");
    assert!(report.regressions[0].delta_pct < 0.0);
}

#[tokio::test]
async fn seeded_runs_replay_byte_identical_audio() {
    let (first, rig_a) = run_booking(9, None).await;
    rig_a.adapter.disconnect().await.expect("disconnect");
    let (second, rig_b) = run_booking(9, None).await;
    rig_b.adapter.disconnect().await.expect("disconnect");

    // The echo system returns the utterance it received, so byte-equal
    // response audio means byte-equal pushed audio.
    let audio_of = |results: &TestResults| -> Vec<u8> {
        results
            .responses
            .iter()
            .flat_map(|r| r.audio.iter().copied())
            .collect()
    };
    let first_audio = audio_of(&first);
    assert!(!first_audio.is_empty());
    assert_eq!(first_audio, audio_of(&second));
}

#[tokio::test]
async fn registry_reset_between_runs_behaves_like_fresh() {
    let (first, mut rig) = run_booking(11, None).await;
    assert!(first.all_passed());

    rig.registry.reset();
    assert!(rig.registry.call_log().is_empty());

    // Second run on the same connection: the scripted turn is spent, the
    // default echo turn carries no tool call, so the expectation times
    // out — on a clean log, exactly like a fresh registry would.
    let system: Arc<dyn VoiceSystem> = Arc::clone(&rig.adapter) as Arc<dyn VoiceSystem>;
    let results = rig
        .orchestrator
        .run(
            &scenario(json!({
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "book a room for two nights" },
                    { "at": "1s", "action": "expect_tool_call", "tool": "create_booking",
                      "timeout_ms": 100 },
                ],
            })),
            Some(system),
        )
        .await
        .expect("second run");
    assert_eq!(results.assertions.len(), 1);
    assert!(!results.assertions[0].passed);
    assert_eq!(rig.registry.call_log().len(), 0);
    rig.adapter.disconnect().await.expect("disconnect");
}
