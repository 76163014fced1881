//! Value types for the media streams flowing through the harness.

/// A contiguous block of PCM16 LE audio, as produced by the audio layer
/// or a TTS backend. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Raw little-endian 16-bit PCM bytes.
    pub data: Vec<u8>,
    /// Clock time (seconds) at which the chunk was emitted.
    pub timestamp: f64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (mono throughout the harness).
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, timestamp: f64) -> Self {
        Self {
            data,
            timestamp,
            sample_rate: 16_000,
            channels: 1,
            sample_width: 2,
        }
    }

    pub fn with_rate(data: Vec<u8>, timestamp: f64, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::new(data, timestamp)
        }
    }

    /// Build a chunk from i16 samples.
    pub fn from_samples(samples: &[i16], timestamp: f64, sample_rate: u32) -> Self {
        Self::with_rate(samples_to_bytes(samples), timestamp, sample_rate)
    }

    /// Decode the PCM bytes into i16 samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        bytes_to_samples(&self.data)
    }

    /// Duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        let samples = self.data.len() / usize::from(self.sample_width.max(1));
        samples as f64 / f64::from(self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single synthesized video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    /// Clock time (seconds) at which the frame was emitted.
    pub timestamp: f64,
    /// `(width, height)` in pixels.
    pub resolution: (u32, u32),
    pub format: String,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, timestamp: f64) -> Self {
        Self {
            data,
            timestamp,
            resolution: (1280, 720),
            format: "rgb24".into(),
        }
    }
}

pub(crate) fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

pub(crate) fn bytes_to_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
