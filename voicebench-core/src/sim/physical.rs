//! Physical-world event simulator.
//!
//! Dispatches named multi-event scenarios (multitasking, device events,
//! environment transitions) onto the audio and noise layers and returns a
//! log of the actions taken.

use tracing::debug;

use crate::clock::SharedClock;
use crate::sim::audio::AudioSimulator;
use crate::sim::noise::NoiseEngine;

/// What one physical event does to the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorldEffect {
    /// Switching to speakerphone introduces echo.
    AudioQualityChange,
    /// Short output gap, e.g. a bluetooth handover.
    BriefAudioGap { gap_ms: u64 },
    /// Ambient profile transition.
    AmbientChange {
        transition: Option<(&'static str, &'static str)>,
        duration_s: f64,
    },
    /// A one-off transient noise.
    TransientNoise { source: &'static str },
    CompetingSpeech,
    /// Sustained keyboard clatter while the user multitasks.
    BackgroundNoise,
    MicMovement,
    ScreenContentChange,
}

/// One event inside a scenario: `(kind, effect)`.
pub type WorldEvent = (&'static str, WorldEffect);

pub const SCENARIOS: &[(&str, &[WorldEvent])] = &[
    (
        "multitasking",
        &[
            ("typing", WorldEffect::BackgroundNoise),
            ("walking", WorldEffect::MicMovement),
            (
                "driving",
                WorldEffect::AmbientChange {
                    transition: Some(("quiet_room", "car_driving")),
                    duration_s: 3.0,
                },
            ),
        ],
    ),
    (
        "device_events",
        &[
            ("switch_to_speaker", WorldEffect::AudioQualityChange),
            ("bluetooth_switch", WorldEffect::BriefAudioGap { gap_ms: 500 }),
            (
                "notification_sound",
                WorldEffect::TransientNoise {
                    source: "notification",
                },
            ),
            ("app_switch", WorldEffect::ScreenContentChange),
        ],
    ),
    (
        "environment_change",
        &[
            (
                "enter_room",
                WorldEffect::AmbientChange {
                    transition: Some(("street", "quiet_room")),
                    duration_s: 3.0,
                },
            ),
            ("someone_enters", WorldEffect::CompetingSpeech),
            (
                "door_closes",
                WorldEffect::AmbientChange {
                    transition: None,
                    duration_s: 0.0,
                },
            ),
        ],
    ),
];

/// One entry of the returned action log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldAction {
    pub event: String,
    pub action: String,
}

#[derive(Default)]
pub struct PhysicalWorldSimulator {
    clock: Option<SharedClock>,
}

impl PhysicalWorldSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = Some(clock);
    }

    async fn pace_ms(&self, ms: u64) {
        match &self.clock {
            Some(clock) => clock.sleep(ms as f64 / 1000.0).await,
            None => tokio::time::sleep(std::time::Duration::from_millis(ms)).await,
        }
    }

    /// Run through all events of a named scenario. Unknown names produce
    /// an empty log.
    pub async fn run_scenario(
        &self,
        scenario_name: &str,
        audio: Option<&mut AudioSimulator>,
        noise: Option<&mut NoiseEngine>,
    ) -> Vec<WorldAction> {
        let Some((_, events)) = SCENARIOS.iter().find(|(name, _)| *name == scenario_name)
        else {
            debug!(scenario = scenario_name, "unknown physical-world scenario");
            return Vec::new();
        };

        let mut audio = audio;
        let mut noise = noise;
        let mut log = Vec::with_capacity(events.len());
        for (kind, effect) in *events {
            let action = self
                .apply_event(*effect, audio.as_deref_mut(), noise.as_deref_mut())
                .await;
            debug!(event = kind, action = action.as_str(), "physical event applied");
            log.push(WorldAction {
                event: (*kind).to_owned(),
                action,
            });
        }
        log
    }

    async fn apply_event(
        &self,
        effect: WorldEffect,
        audio: Option<&mut AudioSimulator>,
        noise: Option<&mut NoiseEngine>,
    ) -> String {
        match effect {
            WorldEffect::AudioQualityChange => match audio {
                Some(audio) => {
                    audio.enable_echo(150.0, 0.3);
                    "echo_enabled".into()
                }
                None => "no_audio_sim".into(),
            },
            WorldEffect::BriefAudioGap { gap_ms } => {
                self.pace_ms(gap_ms).await;
                format!("audio_gap_{gap_ms}ms")
            }
            WorldEffect::AmbientChange {
                transition,
                duration_s,
            } => match noise {
                Some(noise) => {
                    if let Some((from, to)) = transition {
                        noise.crossfade_profile(from, to, duration_s);
                    }
                    "noise_profile_changed".into()
                }
                None => "no_noise_engine".into(),
            },
            WorldEffect::TransientNoise { source } => match noise {
                Some(noise) => {
                    noise.inject("transient", Some(source));
                    "transient_injected".into()
                }
                None => "no_noise_engine".into(),
            },
            WorldEffect::CompetingSpeech => match noise {
                Some(noise) => {
                    noise.inject("competing_speech", None);
                    "competing_speech_injected".into()
                }
                None => "no_noise_engine".into(),
            },
            WorldEffect::BackgroundNoise => match noise {
                Some(noise) => {
                    noise.inject("transient", Some("keyboard"));
                    "keyboard_noise_injected".into()
                }
                None => "no_noise_engine".into(),
            },
            WorldEffect::MicMovement => "mic_movement_simulated".into(),
            WorldEffect::ScreenContentChange => "screen_content_changed".into(),
        }
    }
}
