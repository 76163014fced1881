//! Visual input simulator: camera, screen share and document scans.
//!
//! Frames are synthesized deterministically from the request parameters
//! (a solid colour derived from the scene name), so runs are reproducible
//! without any image assets.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::clock::SharedClock;
use crate::media::VideoFrame;
use crate::sim::name_seed;

const SCREEN_BACKGROUND: u8 = 40;
const DOCUMENT_BACKGROUND: u8 = 240;
const PLACEHOLDER_GREY: u8 = 128;

/// Parameters of one `inject_video` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoRequest {
    /// `camera`, `screen`, `document` or `image_file`.
    pub source: String,
    /// Seconds of video to produce.
    pub duration: f64,
    pub scene: String,
    pub app: String,
    pub content: String,
    pub path: String,
    pub lighting: String,
}

impl Default for VideoRequest {
    fn default() -> Self {
        Self {
            source: "camera".into(),
            duration: 1.0,
            scene: "office_desk".into(),
            app: "browser".into(),
            content: String::new(),
            path: String::new(),
            lighting: "normal".into(),
        }
    }
}

impl VideoRequest {
    pub fn from_params(params: &Value) -> Self {
        serde_json::from_value(params.clone()).unwrap_or_default()
    }
}

/// Seam for synthesizing raw frames. The builtin renderers produce solid
/// colours; a richer backend can be swapped in without touching pacing.
pub trait FrameRenderer: Send + Sync {
    fn render(&self, request: &VideoRequest, resolution: (u32, u32), num_frames: usize)
        -> Vec<Vec<u8>>;
}

fn solid_frames(value: u8, resolution: (u32, u32), num_frames: usize) -> Vec<Vec<u8>> {
    let (w, h) = resolution;
    let frame = vec![value; (w * h * 3) as usize];
    vec![frame; num_frames]
}

/// Synthetic camera: colour keyed by the scene name.
pub struct CameraRenderer;

impl FrameRenderer for CameraRenderer {
    fn render(
        &self,
        request: &VideoRequest,
        resolution: (u32, u32),
        num_frames: usize,
    ) -> Vec<Vec<u8>> {
        let colour = (name_seed(&request.scene) % 256) as u8;
        solid_frames(colour, resolution, num_frames)
    }
}

/// Synthetic screen share: dark application background.
pub struct ScreenRenderer;

impl FrameRenderer for ScreenRenderer {
    fn render(
        &self,
        _request: &VideoRequest,
        resolution: (u32, u32),
        num_frames: usize,
    ) -> Vec<Vec<u8>> {
        solid_frames(SCREEN_BACKGROUND, resolution, num_frames)
    }
}

/// Synthetic document scan: white page.
pub struct DocumentRenderer;

impl FrameRenderer for DocumentRenderer {
    fn render(
        &self,
        _request: &VideoRequest,
        resolution: (u32, u32),
        num_frames: usize,
    ) -> Vec<Vec<u8>> {
        solid_frames(DOCUMENT_BACKGROUND, resolution, num_frames)
    }
}

#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub fps: u32,
    pub resolution: (u32, u32),
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            resolution: (1280, 720),
        }
    }
}

/// Simulates camera / screen-share / document input channels.
pub struct VideoSimulator {
    pub fps: u32,
    pub resolution: (u32, u32),
    camera: Box<dyn FrameRenderer>,
    screen: Box<dyn FrameRenderer>,
    document: Box<dyn FrameRenderer>,
    clock: Option<SharedClock>,
}

impl Default for VideoSimulator {
    fn default() -> Self {
        Self::new(VideoConfig::default())
    }
}

impl VideoSimulator {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            fps: config.fps,
            resolution: config.resolution,
            camera: Box::new(CameraRenderer),
            screen: Box::new(ScreenRenderer),
            document: Box::new(DocumentRenderer),
            clock: None,
        }
    }

    pub fn set_clock(&mut self, clock: SharedClock) {
        self.clock = Some(clock);
    }

    /// Build a frame stream for one video request.
    pub fn generate(&self, request: &VideoRequest) -> VideoStream {
        let num_frames = ((f64::from(self.fps) * request.duration) as usize).max(1);

        let frames = match request.source.as_str() {
            "screen" => self.screen.render(request, self.resolution, num_frames),
            "document" => self.document.render(request, self.resolution, num_frames),
            "image_file" => static_frames(&request.path, self.resolution, num_frames),
            _ => self.camera.render(request, self.resolution, num_frames),
        };
        debug!(
            source = request.source.as_str(),
            frames = frames.len(),
            fps = self.fps,
            "video stream prepared"
        );

        VideoStream {
            frames: frames.into(),
            frame_secs: 1.0 / f64::from(self.fps),
            resolution: self.resolution,
            clock: self.clock.clone(),
            started: false,
        }
    }
}

/// Repeat an image file as static frames, grey placeholder when missing.
fn static_frames(path: &str, resolution: (u32, u32), num_frames: usize) -> Vec<Vec<u8>> {
    match std::fs::read(path) {
        Ok(data) => vec![data; num_frames],
        Err(_) => solid_frames(PLACEHOLDER_GREY, resolution, num_frames),
    }
}

/// Finite frame stream paced at 1/fps.
pub struct VideoStream {
    frames: std::collections::VecDeque<Vec<u8>>,
    frame_secs: f64,
    resolution: (u32, u32),
    clock: Option<SharedClock>,
    started: bool,
}

impl VideoStream {
    pub async fn next(&mut self) -> Option<VideoFrame> {
        let data = self.frames.pop_front()?;
        if self.started {
            match &self.clock {
                Some(clock) => clock.sleep(self.frame_secs).await,
                None => {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(self.frame_secs)).await
                }
            }
        }
        self.started = true;

        let timestamp = self.clock.as_ref().map_or(0.0, |c| c.now());
        Some(VideoFrame {
            data,
            timestamp,
            resolution: self.resolution,
            format: "rgb24".into(),
        })
    }
}
