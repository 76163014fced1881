//! Uniform interface to the system under test.
//!
//! The harness interacts with a voice system exclusively through the
//! [`VoiceSystem`] trait, keeping the orchestrator agnostic to any
//! concrete wire protocol. [`wire::WireAdapter`] is the reference
//! implementation over a pluggable [`transport::Transport`];
//! [`echo::EchoServer`] is the in-process scripted counterpart used by
//! the end-to-end tests.

pub mod echo;
pub mod transport;
pub mod wire;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::media::{AudioChunk, VideoFrame};

/// JSON object shorthand used for tool arguments and scenario params.
pub type JsonMap = Map<String, Value>;

/// Externally observable state of the system under test.
///
/// Owned and advanced only by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    ToolCalling,
}

/// Discriminant of a [`ResponseEvent`], for metrics and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Audio,
    Text,
    ToolCall,
    ToolResult,
    StateChange,
    Error,
}

/// Kind-specific payload of a response event.
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    Audio {
        bytes: Vec<u8>,
    },
    Text {
        text: String,
    },
    ToolCall {
        name: String,
        args: JsonMap,
        call_id: String,
    },
    ToolResult {
        name: String,
        call_id: String,
        data: Value,
    },
    StateChange {
        state: SystemState,
    },
    Error {
        message: String,
    },
}

/// An event emitted by the system under test.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    /// Clock time (seconds) when the adapter emitted the event.
    pub timestamp: f64,
    pub payload: ResponsePayload,
}

impl ResponseEvent {
    pub fn new(timestamp: f64, payload: ResponsePayload) -> Self {
        Self { timestamp, payload }
    }

    pub fn kind(&self) -> ResponseKind {
        match self.payload {
            ResponsePayload::Audio { .. } => ResponseKind::Audio,
            ResponsePayload::Text { .. } => ResponseKind::Text,
            ResponsePayload::ToolCall { .. } => ResponseKind::ToolCall,
            ResponsePayload::ToolResult { .. } => ResponseKind::ToolResult,
            ResponsePayload::StateChange { .. } => ResponseKind::StateChange,
            ResponsePayload::Error { .. } => ResponseKind::Error,
        }
    }
}

/// Result of a mock tool invocation, returned to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub latency_ms: f64,
}

impl ToolOutcome {
    pub fn ok(data: Value, latency_ms: f64) -> Self {
        Self {
            success: true,
            data,
            error: None,
            latency_ms,
        }
    }

    pub fn err(error: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            latency_ms,
        }
    }
}

/// Handler for tool calls routed through an adapter or the mock registry.
///
/// Plain `Fn(&JsonMap) -> Value` closures satisfy this via the blanket
/// impl; async handlers implement the trait directly.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &JsonMap) -> Value;
}

#[async_trait]
impl<F> ToolHandler for F
where
    F: Fn(&JsonMap) -> Value + Send + Sync,
{
    async fn call(&self, args: &JsonMap) -> Value {
        self(args)
    }
}

/// Session-level configuration pushed to the system under test.
///
/// Unrecognized options land in `extra` and are preserved verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl SessionOptions {
    /// Merge `update` into `self`: set fields win, `extra` keys are
    /// overwritten pairwise, everything else is preserved.
    pub fn merge(&mut self, update: SessionOptions) {
        if update.voice.is_some() {
            self.voice = update.voice;
        }
        if update.instructions.is_some() {
            self.instructions = update.instructions;
        }
        if update.temperature.is_some() {
            self.temperature = update.temperature;
        }
        if update.turn_detection.is_some() {
            self.turn_detection = update.turn_detection;
        }
        if update.tools.is_some() {
            self.tools = update.tools;
        }
        for (key, value) in update.extra {
            self.extra.insert(key, value);
        }
    }
}

/// Default inactivity timeout on response stream consumption.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lazy, single-consumer view over the adapter's response feed.
///
/// Each call to [`VoiceSystem::response_stream`] produces an independent
/// subscription (the underlying channel is a broadcast, mirroring how the
/// orchestrator's collector and the barge-in trigger can observe the same
/// feed). The stream ends on disconnect, after a fatal error event, or
/// when no event arrives within the inactivity timeout.
pub struct ResponseStream {
    rx: broadcast::Receiver<ResponseEvent>,
    idle_timeout: Duration,
    done: bool,
}

impl ResponseStream {
    pub fn new(rx: broadcast::Receiver<ResponseEvent>, idle_timeout: Duration) -> Self {
        Self {
            rx,
            idle_timeout,
            done: false,
        }
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<ResponseEvent> {
        use tokio::sync::broadcast::error::RecvError;

        if self.done {
            return None;
        }
        loop {
            match tokio::time::timeout(self.idle_timeout, self.rx.recv()).await {
                Err(_elapsed) => {
                    self.done = true;
                    return None;
                }
                Ok(Err(RecvError::Closed)) => {
                    self.done = true;
                    return None;
                }
                // Slow consumer: skip the lag marker and keep draining.
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Ok(event)) => {
                    if event.kind() == ResponseKind::Error {
                        self.done = true;
                    }
                    return Some(event);
                }
            }
        }
    }
}

/// Capability surface the orchestrator drives the system under test with.
#[async_trait]
pub trait VoiceSystem: Send + Sync {
    /// Establish the transport. Fails with `HarnessError::Connection`
    /// when the system is unreachable.
    async fn connect(&self) -> Result<()>;

    /// Tear down. Idempotent; releases all background tasks.
    async fn disconnect(&self) -> Result<()>;

    /// Send one PCM chunk. Fails with `HarnessError::NotConnected` when
    /// the connection is closed.
    async fn push_audio(&self, chunk: AudioChunk) -> Result<()>;

    /// Send one video frame.
    async fn push_video(&self, frame: VideoFrame) -> Result<()>;

    /// Signal end-of-utterance. No-op when not connected.
    async fn commit_audio(&self) -> Result<()>;

    /// Request generation; transitions state to `Thinking`.
    async fn create_response(&self) -> Result<()>;

    /// Subscribe to the response feed.
    fn response_stream(&self) -> ResponseStream;

    /// Route matching tool calls to `handler`.
    async fn register_tool_handler(
        &self,
        name: &str,
        handler: std::sync::Arc<dyn ToolHandler>,
    ) -> Result<()>;

    /// Update voice / instructions / tools / turn-detection / temperature.
    async fn configure_session(&self, options: SessionOptions) -> Result<()>;

    /// Current system state snapshot.
    fn state(&self) -> SystemState;
}
