//! Barge-in / interruption simulator.
//!
//! Interrupting a speaking system is one of the hardest behaviors for a
//! voice agent to get right, which makes it the most valuable one to
//! test. Each named pattern models a different interruption habit: the
//! eager keyword interrupter, the correcting user, the impatient user,
//! and pure backchannel acknowledgements (not a true interruption).

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::adapter::ResponseStream;
use crate::clock::SharedClock;
use crate::error::Result;
use crate::sim::audio::{AudioSimulator, SpeechStyle};

/// Cap on waiting for a stream-based trigger condition.
const TRIGGER_WAIT_CAP: Duration = Duration::from_secs(5);

/// A barge-in event handed back to the orchestrator.
#[derive(Debug, Clone)]
pub struct InterruptEvent {
    /// Concatenated PCM of the user's interruption utterance.
    pub audio: Vec<u8>,
    /// Backchannel acknowledgements are not true interruptions.
    pub is_true_interrupt: bool,
    /// Clock time (seconds) when the interruption fired.
    pub timestamp: f64,
}

/// Static description of one interruption habit.
#[derive(Debug, Clone, Copy)]
pub struct BargeInPattern {
    pub name: &'static str,
    pub trigger: &'static str,
    /// Human reaction delay range in milliseconds.
    pub delay_ms: (f64, f64),
    /// Template for the interruption utterance. `{correction}` and
    /// `{question}` are substituted.
    pub user_says: &'static str,
    pub is_true_interrupt: bool,
}

pub const PATTERNS: &[BargeInPattern] = &[
    BargeInPattern {
        name: "eager_interrupt",
        trigger: "keyword_detected",
        delay_ms: (100.0, 300.0),
        user_says: "wait, stop right there",
        is_true_interrupt: true,
    },
    BargeInPattern {
        name: "correction",
        trigger: "incorrect_info",
        delay_ms: (200.0, 500.0),
        user_says: "No no, I meant {correction}",
        is_true_interrupt: true,
    },
    BargeInPattern {
        name: "impatient",
        trigger: "response_duration > 5s",
        delay_ms: (0.0, 100.0),
        user_says: "OK OK I got it, just tell me {question}",
        is_true_interrupt: true,
    },
    BargeInPattern {
        name: "backchannel",
        trigger: "periodic",
        delay_ms: (0.0, 100.0),
        user_says: "mm-hmm",
        is_true_interrupt: false,
    },
];

fn pattern(name: &str) -> BargeInPattern {
    PATTERNS
        .iter()
        .find(|p| p.name == name)
        .copied()
        .unwrap_or(PATTERNS[0])
}

/// Simulates barge-in behaviour against a speaking system.
pub struct BargeInSimulator {
    clock: Option<SharedClock>,
    rng: StdRng,
}

impl Default for BargeInSimulator {
    fn default() -> Self {
        Self::with_seed(0xba53)
    }
}

impl BargeInSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            clock: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = Some(clock);
    }

    fn now(&self) -> f64 {
        self.clock.as_ref().map_or(0.0, |c| c.now())
    }

    async fn pace(&self, secs: f64) {
        match &self.clock {
            Some(clock) => clock.sleep(secs).await,
            None => tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await,
        }
    }

    /// Execute a barge-in pattern: wait for the trigger, apply the human
    /// reaction delay, render the interruption utterance and return it.
    pub async fn simulate(
        &mut self,
        pattern_name: &str,
        system_stream: Option<&mut ResponseStream>,
        user_audio_gen: Option<&AudioSimulator>,
        correction: &str,
        question: &str,
    ) -> Result<InterruptEvent> {
        let pattern = pattern(pattern_name);
        debug!(pattern = pattern.name, trigger = pattern.trigger, "barge-in armed");

        self.wait_trigger(pattern.trigger, system_stream).await;

        let delay_ms = self.rng.gen_range(pattern.delay_ms.0..=pattern.delay_ms.1);
        self.pace(delay_ms / 1000.0).await;

        let user_text = pattern
            .user_says
            .replace("{correction}", correction)
            .replace("{question}", question);

        let audio = match user_audio_gen {
            Some(generator) => {
                let mut stream = generator
                    .generate(Some(&user_text), None, &SpeechStyle::default())
                    .await?;
                stream.collect_bytes().await
            }
            None => Vec::new(),
        };

        Ok(InterruptEvent {
            audio,
            is_true_interrupt: pattern.is_true_interrupt,
            timestamp: self.now(),
        })
    }

    async fn wait_trigger(&mut self, trigger: &str, stream: Option<&mut ResponseStream>) {
        match trigger {
            "immediate" => {}
            "keyword_detected" => {
                // Interrupt as soon as the system starts producing output.
                if let Some(stream) = stream {
                    let _ = tokio::time::timeout(TRIGGER_WAIT_CAP, stream.next()).await;
                }
            }
            "periodic" => {
                let wait = self.rng.gen_range(2.0..=4.0);
                self.pace(wait).await;
            }
            other => {
                // Expression triggers of the form "response_duration > Ns".
                if let Some((_, rhs)) = other.split_once('>') {
                    if let Ok(seconds) = rhs.trim().trim_end_matches('s').parse::<f64>() {
                        self.pace(seconds).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::sim::audio::AudioConfig;
    use std::sync::Arc;

    fn rigged() -> (BargeInSimulator, AudioSimulator, Arc<SimulatedClock>) {
        let clock = Arc::new(SimulatedClock::new());
        let mut barge = BargeInSimulator::with_seed(17);
        barge.set_clock(Arc::clone(&clock));
        let mut audio = AudioSimulator::new(AudioConfig::default());
        audio.set_clock(Arc::clone(&clock));
        (barge, audio, clock)
    }

    #[tokio::test]
    async fn eager_interrupt_renders_audio_and_stamps_time() {
        let (mut barge, audio, clock) = rigged();
        clock.advance_to(2.0).await;

        let interrupt = barge
            .simulate("eager_interrupt", None, Some(&audio), "", "")
            .await
            .expect("simulate");
        assert!(interrupt.is_true_interrupt);
        assert!(!interrupt.audio.is_empty());
        assert_eq!(interrupt.timestamp, 2.0);
    }

    #[tokio::test]
    async fn correction_template_substitutes() {
        let (mut barge, audio, _clock) = rigged();
        let plain = barge
            .simulate("correction", None, Some(&audio), "Tuesday", "")
            .await
            .expect("simulate");
        let other = barge
            .simulate("correction", None, Some(&audio), "next Friday afternoon", "")
            .await
            .expect("simulate");
        // Different substitutions render differently-sized utterances.
        assert_ne!(plain.audio.len(), other.audio.len());
    }

    #[tokio::test]
    async fn backchannel_is_not_a_true_interrupt() {
        let (mut barge, audio, _clock) = rigged();
        let interrupt = barge
            .simulate("backchannel", None, Some(&audio), "", "")
            .await
            .expect("simulate");
        assert!(!interrupt.is_true_interrupt);
        assert!(!interrupt.audio.is_empty());
    }

    #[tokio::test]
    async fn unknown_pattern_falls_back_to_eager() {
        let (mut barge, _, _) = rigged();
        let interrupt = barge
            .simulate("no_such_pattern", None, None, "", "")
            .await
            .expect("simulate");
        assert!(interrupt.is_true_interrupt);
        assert!(interrupt.audio.is_empty(), "no generator supplied");
    }

    #[tokio::test]
    async fn keyword_trigger_peeks_the_system_stream() {
        use crate::adapter::{ResponseEvent, ResponsePayload, ResponseStream};
        use tokio::sync::broadcast;

        let (mut barge, _, _) = rigged();
        let (tx, rx) = broadcast::channel(8);
        let mut stream = ResponseStream::new(rx, Duration::from_secs(1));
        tx.send(ResponseEvent::new(
            0.1,
            ResponsePayload::Text { text: "well".into() },
        ))
        .expect("send");

        let interrupt = barge
            .simulate("eager_interrupt", Some(&mut stream), None, "", "")
            .await
            .expect("simulate");
        assert!(interrupt.is_true_interrupt);
    }
}
