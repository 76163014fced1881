//! Speech stream simulator: TTS synthesis, speech-style transforms, and
//! clock-paced chunked streaming.
//!
//! ## Pipeline
//!
//! ```text
//! text / tts://… ──► SpeechSynthesizer ─┐
//! audio_file ──────► WAV loader ────────┤
//!                                       ▼
//!                        style transforms (speed → hesitation →
//!                        interruption trim → volume → echo)
//!                                       ▼
//!                        20 ms chunks paced by the clock
//! ```
//!
//! The synthesizer seam keeps the harness runnable without any TTS
//! service: [`ToneSynth`] produces a deterministic sine tone whose
//! frequency derives from the text and whose duration approximates
//! natural speech cadence.

use std::path::Path;

use async_trait::async_trait;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use serde::Deserialize;
use tracing::debug;

use crate::clock::SharedClock;
use crate::error::{HarnessError, Result};
use crate::media::{bytes_to_samples, samples_to_bytes, AudioChunk};
use crate::sim::name_seed;

/// Input frame count per rubato call in the speed transform.
const SPEED_CHUNK: usize = 960;
/// Amplitude threshold below which leading samples count as silence.
const SILENCE_THRESHOLD: i16 = 500;
/// Longest run of leading silence removed by the interruption trim.
const TRIM_WINDOW_MS: usize = 50;
/// Synthetic filler pause inserted by the hesitation transform.
const FILLER_MS: usize = 150;
/// A filler is inserted after every this many seconds of speech.
const FILLER_PERIOD_SECS: usize = 2;

/// Simulated speech characteristics applied to raw PCM.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechStyle {
    pub voice: Option<String>,
    /// Playback speed: >1.0 compresses, <1.0 dilates.
    pub speed: f64,
    pub emotion: String,
    /// Insert short pauses to simulate a hesitant speaker.
    pub hesitation: bool,
    /// Trim leading silence so interrupted speech starts immediately.
    pub interruption: bool,
    /// Linear volume factor, clipped to the PCM16 range.
    pub volume: Option<f64>,
}

impl Default for SpeechStyle {
    fn default() -> Self {
        Self {
            voice: None,
            speed: 1.0,
            emotion: "neutral".into(),
            hesitation: false,
            interruption: false,
            volume: None,
        }
    }
}

/// Text-to-speech backend seam.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize speech, returning raw PCM16 LE bytes at `sample_rate`.
    async fn synthesize(&self, text: &str, style: &SpeechStyle, sample_rate: u32)
        -> Result<Vec<u8>>;
}

/// Deterministic sine-tone synthesizer standing in for real speech.
///
/// Duration is proportional to text length (~80 ms per character), the
/// frequency derives from the text so different utterances are
/// distinguishable in recordings.
#[derive(Debug, Default)]
pub struct ToneSynth;

#[async_trait]
impl SpeechSynthesizer for ToneSynth {
    async fn synthesize(
        &self,
        text: &str,
        _style: &SpeechStyle,
        sample_rate: u32,
    ) -> Result<Vec<u8>> {
        let duration = (text.chars().count() as f64 * 0.08).max(0.5);
        let num_samples = (f64::from(sample_rate) * duration) as usize;
        let freq = 200.0 + (name_seed(text) % 300) as f64;

        let mut samples = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let t = i as f64 / f64::from(sample_rate);
            let value = (2.0 * std::f64::consts::PI * freq * t).sin() * 16_000.0;
            samples.push(value as i16);
        }
        Ok(samples_to_bytes(&samples))
    }
}

/// Fixed-ratio sample-rate converter used by the speed transform.
///
/// A ratio of ~1.0 is a zero-copy passthrough — no rubato session is
/// created at all.
pub(crate) struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    pub(crate) fn with_ratio(ratio: f64, chunk_size: usize) -> Result<Self> {
        if (ratio - 1.0).abs() < 1e-6 {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| HarnessError::Audio(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty
    /// until a full input chunk has accumulated).
    pub(crate) fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    tracing::error!("resampler process error: {e}");
                }
            }
            self.input_buf.drain(..self.chunk_size);
        }
        result
    }

    /// Pad the leftover partial chunk with silence and drain it.
    pub(crate) fn flush(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            return Vec::new();
        }
        let missing = self.chunk_size - (self.input_buf.len() % self.chunk_size);
        if missing < self.chunk_size {
            let pad = vec![0f32; missing];
            return self.process(&pad);
        }
        Vec::new()
    }

    pub(crate) fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
struct EchoParams {
    delay_ms: f64,
    decay: f32,
}

/// Configuration for the audio stream simulator.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub chunk_ms: u64,
    pub sample_width: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_ms: 20,
            sample_width: 2,
        }
    }
}

/// Simulates a real microphone input stream.
pub struct AudioSimulator {
    config: AudioConfig,
    synth: std::sync::Arc<dyn SpeechSynthesizer>,
    clock: Option<SharedClock>,
    echo: Option<EchoParams>,
}

impl Default for AudioSimulator {
    fn default() -> Self {
        Self::new(AudioConfig::default())
    }
}

impl AudioSimulator {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            synth: std::sync::Arc::new(ToneSynth),
            clock: None,
            echo: None,
        }
    }

    /// Swap the TTS backend (e.g. a real provider adapter).
    pub fn with_synthesizer(mut self, synth: std::sync::Arc<dyn SpeechSynthesizer>) -> Self {
        self.synth = synth;
        self
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = Some(clock);
    }

    /// Speaker-phone echo toggled by physical-world scenarios.
    pub fn enable_echo(&mut self, delay_ms: f64, decay: f32) {
        self.echo = Some(EchoParams { delay_ms, decay });
    }

    pub fn disable_echo(&mut self) {
        self.echo = None;
    }

    /// Build an audio stream from text (optionally `tts://`-prefixed) or a
    /// pre-recorded WAV file. With neither input the stream is empty.
    pub async fn generate(
        &self,
        text: Option<&str>,
        audio_file: Option<&Path>,
        style: &SpeechStyle,
    ) -> Result<AudioStream> {
        let text = text.filter(|t| !t.is_empty());

        let raw = if let Some(text) = text {
            let spoken = text.strip_prefix("tts://").unwrap_or(text);
            self.synth
                .synthesize(spoken, style, self.config.sample_rate)
                .await?
        } else if let Some(path) = audio_file {
            load_wav(path)?
        } else {
            Vec::new()
        };

        let styled = self.apply_style(raw, style);

        let chunk_bytes = (self.config.sample_rate as usize * self.config.chunk_ms as usize
            / 1000)
            * usize::from(self.config.sample_width);
        debug!(
            bytes = styled.len(),
            chunk_bytes,
            sample_rate = self.config.sample_rate,
            "audio stream prepared"
        );

        Ok(AudioStream {
            raw: styled,
            pos: 0,
            chunk_bytes: chunk_bytes.max(2),
            chunk_secs: self.config.chunk_ms as f64 / 1000.0,
            sample_rate: self.config.sample_rate,
            clock: self.clock.clone(),
            started: false,
        })
    }

    fn apply_style(&self, raw: Vec<u8>, style: &SpeechStyle) -> Vec<u8> {
        let mut samples = bytes_to_samples(&raw);

        if (style.speed - 1.0).abs() > 1e-6 && style.speed > 0.0 {
            samples = resample_speed(&samples, style.speed);
        }
        if style.hesitation {
            samples = insert_fillers(&samples, self.config.sample_rate);
        }
        if style.interruption {
            samples = trim_leading_silence(samples, self.config.sample_rate);
        }
        if let Some(factor) = style.volume {
            for s in samples.iter_mut() {
                *s = (f64::from(*s) * factor).clamp(-32_768.0, 32_767.0) as i16;
            }
        }
        if let Some(echo) = self.echo {
            apply_echo(&mut samples, self.config.sample_rate, echo);
        }

        samples_to_bytes(&samples)
    }
}

/// Finite, single-consumer, non-restartable stream of audio chunks.
///
/// One chunk's worth of pacing separates consecutive chunks; the clock is
/// observable between yields.
pub struct AudioStream {
    raw: Vec<u8>,
    pos: usize,
    chunk_bytes: usize,
    chunk_secs: f64,
    sample_rate: u32,
    clock: Option<SharedClock>,
    started: bool,
}

impl AudioStream {
    pub async fn next(&mut self) -> Option<AudioChunk> {
        if self.pos >= self.raw.len() {
            return None;
        }
        if self.started {
            match &self.clock {
                Some(clock) => clock.sleep(self.chunk_secs).await,
                None => tokio::time::sleep(std::time::Duration::from_secs_f64(self.chunk_secs)).await,
            }
        }
        self.started = true;

        let end = (self.pos + self.chunk_bytes).min(self.raw.len());
        let data = self.raw[self.pos..end].to_vec();
        self.pos = end;

        let timestamp = self.clock.as_ref().map_or(0.0, |c| c.now());
        Some(AudioChunk::with_rate(data, timestamp, self.sample_rate))
    }

    /// Drain the remaining chunks into one contiguous byte buffer.
    pub async fn collect_bytes(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.next().await {
            bytes.extend_from_slice(&chunk.data);
        }
        bytes
    }
}

/// Change speech speed by resampling in time: >1.0 compresses, <1.0 dilates.
fn resample_speed(samples: &[i16], speed: f64) -> Vec<i16> {
    let mut converter = match RateConverter::with_ratio(1.0 / speed, SPEED_CHUNK) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("speed transform disabled: {e}");
            return samples.to_vec();
        }
    };
    if converter.is_passthrough() {
        return samples.to_vec();
    }

    let floats: Vec<f32> = samples.iter().map(|s| f32::from(*s) / 32_768.0).collect();
    let mut out = converter.process(&floats);
    out.extend(converter.flush());
    out.iter()
        .map(|s| (s * 32_767.0).clamp(-32_768.0, 32_767.0) as i16)
        .collect()
}

/// Insert ~150 ms of silence after every two seconds of speech.
fn insert_fillers(samples: &[i16], sample_rate: u32) -> Vec<i16> {
    let filler_len = sample_rate as usize * FILLER_MS / 1000;
    let period = sample_rate as usize * FILLER_PERIOD_SECS;

    let mut out = Vec::with_capacity(samples.len() + filler_len);
    for block in samples.chunks(period) {
        out.extend_from_slice(block);
        out.extend(std::iter::repeat(0i16).take(filler_len));
    }
    out
}

/// Remove leading silence (up to 50 ms) so interrupted speech starts
/// immediately. Silence longer than the window is left untouched.
fn trim_leading_silence(samples: Vec<i16>, sample_rate: u32) -> Vec<i16> {
    let window = (sample_rate as usize * TRIM_WINDOW_MS / 1000).min(samples.len());
    for (i, sample) in samples.iter().take(window).enumerate() {
        if sample.unsigned_abs() > SILENCE_THRESHOLD as u16 {
            return samples[i..].to_vec();
        }
    }
    samples
}

/// Feedback echo: each sample picks up a decayed copy from `delay_ms` ago.
fn apply_echo(samples: &mut [i16], sample_rate: u32, echo: EchoParams) {
    let delay = (f64::from(sample_rate) * echo.delay_ms / 1000.0) as usize;
    if delay == 0 || delay >= samples.len() {
        return;
    }
    for i in delay..samples.len() {
        let mixed = f32::from(samples[i]) + f32::from(samples[i - delay]) * echo.decay;
        samples[i] = mixed.clamp(-32_768.0, 32_767.0) as i16;
    }
}

/// Load a WAV file as raw PCM16 LE bytes.
fn load_wav(path: &Path) -> Result<Vec<u8>> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| HarnessError::Audio(format!("open {}: {e}", path.display())))?;
    let samples: std::result::Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples = samples.map_err(|e| HarnessError::Audio(format!("decode {}: {e}", path.display())))?;
    Ok(samples_to_bytes(&samples))
}
