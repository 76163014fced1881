//! Network condition simulator: latency, jitter, packet loss, disconnects.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::clock::SharedClock;
use crate::media::AudioChunk;

/// Named profiles: `(name, latency_ms, jitter_ms, loss_rate)`.
pub const PROFILES: &[(&str, f64, f64, f64)] = &[
    ("perfect", 10.0, 2.0, 0.0),
    ("good_4g", 50.0, 15.0, 0.01),
    ("poor_4g", 150.0, 50.0, 0.05),
    ("bad_wifi", 200.0, 100.0, 0.10),
    ("elevator", 500.0, 200.0, 0.30),
];

/// Bit rates below this degrade audio quality.
const BANDWIDTH_FLOOR: u32 = 64_000;

fn profile_params(profile: &str) -> (f64, f64, f64) {
    PROFILES
        .iter()
        .find(|(name, ..)| *name == profile)
        .map_or((10.0, 2.0, 0.0), |(_, l, j, p)| (*l, *j, *p))
}

/// Applies configurable network effects to an audio stream.
pub struct NetworkSimulator {
    pub base_latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_rate: f64,
    pub bandwidth_limit: Option<u32>,
    connected: bool,
    buffer: Vec<AudioChunk>,
    clock: Option<SharedClock>,
    rng: StdRng,
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::new("perfect")
    }
}

impl NetworkSimulator {
    pub fn new(profile: &str) -> Self {
        Self::with_seed(profile, 0x11e7)
    }

    /// Deterministic simulator: loss and jitter draws replay for a seed.
    pub fn with_seed(profile: &str, seed: u64) -> Self {
        let (latency, jitter, loss) = profile_params(profile);
        Self {
            base_latency_ms: latency,
            jitter_ms: jitter,
            loss_rate: loss,
            bandwidth_limit: None,
            connected: true,
            buffer: Vec::new(),
            clock: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = Some(clock);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_profile(&mut self, profile: &str) {
        let (latency, jitter, loss) = profile_params(profile);
        self.configure(Some(latency), Some(jitter), Some(loss));
        debug!(profile, latency, jitter, loss, "network profile set");
    }

    pub fn configure(
        &mut self,
        latency_ms: Option<f64>,
        jitter_ms: Option<f64>,
        loss_rate: Option<f64>,
    ) {
        if let Some(latency) = latency_ms {
            self.base_latency_ms = latency;
        }
        if let Some(jitter) = jitter_ms {
            self.jitter_ms = jitter;
        }
        if let Some(loss) = loss_rate {
            self.loss_rate = loss;
        }
    }

    /// Apply network effects to one chunk. Returns `None` when the chunk
    /// is lost (packet loss) or swallowed by a disconnection.
    pub async fn apply(&mut self, chunk: AudioChunk) -> Option<AudioChunk> {
        if !self.connected {
            self.buffer.push(chunk);
            return None;
        }

        if self.loss_rate > 0.0 && self.rng.gen::<f64>() < self.loss_rate {
            return None;
        }

        let jitter = if self.jitter_ms > 0.0 {
            Normal::new(0.0, self.jitter_ms)
                .map(|normal| normal.sample(&mut self.rng))
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let delay_ms = (self.base_latency_ms + jitter).max(0.0);
        self.pace_ms(delay_ms).await;

        let chunk = match self.bandwidth_limit {
            Some(limit) if limit < BANDWIDTH_FLOOR => degrade(chunk),
            _ => chunk,
        };
        Some(chunk)
    }

    /// Drop the link for `duration_s` seconds; chunks sent meanwhile are
    /// buffered and then discarded on reconnect.
    pub async fn simulate_disconnect(&mut self, duration_s: f64) {
        self.connected = false;
        self.pace_ms(duration_s * 1000.0).await;
        self.connected = true;
        let discarded = self.buffer.len();
        self.buffer.clear();
        debug!(duration_s, discarded, "reconnected after simulated outage");
    }

    async fn pace_ms(&self, ms: f64) {
        match &self.clock {
            Some(clock) => clock.sleep(ms / 1000.0).await,
            None => {
                tokio::time::sleep(std::time::Duration::from_secs_f64(ms.max(0.0) / 1000.0)).await
            }
        }
    }
}

/// Deterministic bandwidth degradation: keep every other sample, then
/// duplicate to restore the original length.
fn degrade(chunk: AudioChunk) -> AudioChunk {
    let samples = chunk.samples();
    let mut reduced = Vec::with_capacity(samples.len());
    for pair in samples.chunks(2) {
        reduced.push(pair[0]);
        reduced.push(pair[0]);
    }
    reduced.truncate(samples.len());
    AudioChunk {
        data: crate::media::samples_to_bytes(&reduced),
        ..chunk
    }
}
