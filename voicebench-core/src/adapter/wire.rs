//! Reference adapter speaking a JSON message protocol over a [`Transport`].
//!
//! ## Client events sent
//!
//! | message | meaning |
//! |---|---|
//! | `session_update` | configure voice, instructions, tools, VAD |
//! | `audio_append`   | stream one base64 PCM chunk |
//! | `audio_commit`   | mark end of an utterance |
//! | `video_frame`    | push one video frame |
//! | `response_create`| request the system to generate a response |
//! | `tool_result`    | answer a tool call |
//!
//! ## Server events handled
//!
//! `speech_started` / `speech_stopped`, `response_created`, `audio_delta`,
//! `text_delta`, `tool_call`, `response_done`, `error`.
//!
//! A listener task decodes incoming frames into [`ResponseEvent`]s,
//! buffers them in a bounded broadcast channel, and updates the observable
//! [`SystemState`] on the canonical transitions (speech markers →
//! listening, `response_created` → thinking, audio deltas → speaking,
//! `response_done` → idle, tool calls → tool-calling).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::transport::Transport;
use crate::adapter::{
    JsonMap, ResponseEvent, ResponsePayload, ResponseStream, SessionOptions, SystemState,
    ToolHandler, VoiceSystem, STREAM_IDLE_TIMEOUT,
};
use crate::clock::SharedClock;
use crate::error::{HarnessError, Result};
use crate::media::{AudioChunk, VideoFrame};

/// Response broadcast capacity: events buffered for slow consumers.
const RESPONSE_BUFFER: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SessionUpdate {
        session: Value,
    },
    AudioAppend {
        /// Base64 PCM16 LE payload.
        audio: String,
        sample_rate: u32,
    },
    AudioCommit,
    VideoFrame {
        /// Base64 frame payload.
        data: String,
        width: u32,
        height: u32,
    },
    ResponseCreate,
    ToolResult {
        call_id: String,
        output: Value,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SpeechStarted,
    SpeechStopped,
    ResponseCreated,
    AudioDelta {
        /// Base64 PCM16 LE payload.
        audio: String,
    },
    TextDelta {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    ResponseDone,
    Error {
        message: String,
    },
}

/// Shared pieces the listener task works on.
struct Shared {
    transport: Arc<dyn Transport>,
    state: Mutex<SystemState>,
    response_tx: broadcast::Sender<ResponseEvent>,
    handlers: Mutex<HashMap<String, Arc<dyn ToolHandler>>>,
    clock: Mutex<Option<SharedClock>>,
    connected: AtomicBool,
}

impl Shared {
    fn now(&self) -> f64 {
        self.clock.lock().as_ref().map_or(0.0, |c| c.now())
    }

    fn set_state(&self, state: SystemState) {
        let changed = {
            let mut current = self.state.lock();
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        };
        if changed {
            let _ = self
                .response_tx
                .send(ResponseEvent::new(self.now(), ResponsePayload::StateChange {
                    state,
                }));
        }
    }

    fn emit(&self, payload: ResponsePayload) {
        let _ = self
            .response_tx
            .send(ResponseEvent::new(self.now(), payload));
    }
}

/// Reference [`VoiceSystem`] implementation.
pub struct WireAdapter {
    shared: Arc<Shared>,
    options: Mutex<SessionOptions>,
    listener: Mutex<Option<JoinHandle<()>>>,
    idle_timeout: Duration,
}

impl WireAdapter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (response_tx, _) = broadcast::channel(RESPONSE_BUFFER);
        Self {
            shared: Arc::new(Shared {
                transport,
                state: Mutex::new(SystemState::Idle),
                response_tx,
                handlers: Mutex::new(HashMap::new()),
                clock: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
            options: Mutex::new(SessionOptions::default()),
            listener: Mutex::new(None),
            idle_timeout: STREAM_IDLE_TIMEOUT,
        }
    }

    /// Attach the run's clock so emitted events carry virtual timestamps.
    pub fn set_clock(&self, clock: SharedClock) {
        *self.shared.clock.lock() = Some(clock);
    }

    /// Override the response-stream inactivity timeout (default 30 s).
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        let frame = serde_json::to_string(message)
            .map_err(|e| HarnessError::Connection(format!("encode frame: {e}")))?;
        self.shared.transport.send(frame).await
    }

    async fn send_session_update(&self) -> Result<()> {
        let session = {
            let options = self.options.lock();
            serde_json::to_value(&*options)
                .map_err(|e| HarnessError::Connection(format!("encode session: {e}")))?
        };
        self.send(&ClientMessage::SessionUpdate { session }).await
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HarnessError::NotConnected)
        }
    }
}

/// Background loop: decode server frames until the transport closes.
async fn listen(shared: Arc<Shared>) {
    while let Some(frame) = shared.transport.recv().await {
        let message: ServerMessage = match serde_json::from_str(&frame) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "ignoring undecodable server frame");
                continue;
            }
        };
        handle_server_message(&shared, message).await;
    }
    shared.connected.store(false, Ordering::SeqCst);
    shared.set_state(SystemState::Idle);
    debug!("listener stopped — transport closed");
}

async fn handle_server_message(shared: &Arc<Shared>, message: ServerMessage) {
    match message {
        ServerMessage::SpeechStarted => shared.set_state(SystemState::Listening),
        ServerMessage::SpeechStopped => debug!("speech stopped"),
        ServerMessage::ResponseCreated => shared.set_state(SystemState::Thinking),
        ServerMessage::AudioDelta { audio } => match BASE64.decode(audio.as_bytes()) {
            Ok(bytes) => {
                shared.set_state(SystemState::Speaking);
                shared.emit(ResponsePayload::Audio { bytes });
            }
            Err(e) => debug!(error = %e, "dropping audio delta with bad base64"),
        },
        ServerMessage::TextDelta { text } => {
            if !text.is_empty() {
                shared.emit(ResponsePayload::Text { text });
            }
        }
        ServerMessage::ToolCall {
            call_id,
            name,
            arguments,
        } => {
            shared.set_state(SystemState::ToolCalling);
            let args: JsonMap = match arguments {
                Value::Object(map) => map,
                _ => JsonMap::new(),
            };
            shared.emit(ResponsePayload::ToolCall {
                name: name.clone(),
                args: args.clone(),
                call_id: call_id.clone(),
            });

            let handler = shared.handlers.lock().get(&name).cloned();
            let output = match handler {
                Some(handler) => handler.call(&args).await,
                None => {
                    warn!(tool = %name, "no handler registered for tool call");
                    json!({ "error": format!("No handler registered for {name}") })
                }
            };

            let reply = ClientMessage::ToolResult {
                call_id: call_id.clone(),
                output: output.clone(),
            };
            if let Ok(frame) = serde_json::to_string(&reply) {
                if let Err(e) = shared.transport.send(frame).await {
                    warn!(error = %e, "failed to deliver tool result");
                }
            }
            shared.emit(ResponsePayload::ToolResult {
                name,
                call_id,
                data: output,
            });
        }
        ServerMessage::ResponseDone => shared.set_state(SystemState::Idle),
        ServerMessage::Error { message } => {
            warn!(error = %message, "server error");
            shared.emit(ResponsePayload::Error { message });
        }
    }
}

#[async_trait]
impl VoiceSystem for WireAdapter {
    async fn connect(&self) -> Result<()> {
        if self.shared.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        *self.listener.lock() = Some(tokio::spawn(listen(shared)));
        info!("adapter connected");
        self.send_session_update().await
    }

    async fn disconnect(&self) -> Result<()> {
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            handle.abort();
            let _ = handle.await;
        }
        self.shared.transport.close();
        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.state.lock() = SystemState::Idle;
        Ok(())
    }

    async fn push_audio(&self, chunk: AudioChunk) -> Result<()> {
        self.ensure_connected()?;
        self.send(&ClientMessage::AudioAppend {
            audio: BASE64.encode(&chunk.data),
            sample_rate: chunk.sample_rate,
        })
        .await
    }

    async fn push_video(&self, frame: VideoFrame) -> Result<()> {
        self.ensure_connected()?;
        self.send(&ClientMessage::VideoFrame {
            data: BASE64.encode(&frame.data),
            width: frame.resolution.0,
            height: frame.resolution.1,
        })
        .await
    }

    async fn commit_audio(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            self.send(&ClientMessage::AudioCommit).await
        } else {
            Ok(())
        }
    }

    async fn create_response(&self) -> Result<()> {
        self.ensure_connected()?;
        self.shared.set_state(SystemState::Thinking);
        self.send(&ClientMessage::ResponseCreate).await
    }

    fn response_stream(&self) -> ResponseStream {
        ResponseStream::new(self.shared.response_tx.subscribe(), self.idle_timeout)
    }

    async fn register_tool_handler(
        &self,
        name: &str,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        self.shared.handlers.lock().insert(name.to_owned(), handler);
        Ok(())
    }

    async fn configure_session(&self, options: SessionOptions) -> Result<()> {
        self.options.lock().merge(options);
        if self.shared.connected.load(Ordering::SeqCst) {
            self.send_session_update().await
        } else {
            Ok(())
        }
    }

    fn state(&self) -> SystemState {
        *self.shared.state.lock()
    }
}
