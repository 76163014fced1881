//! In-process scripted system under test.
//!
//! `EchoServer` sits on the far end of a duplex transport and speaks the
//! wire protocol back at [`super::wire::WireAdapter`]. It is deterministic:
//! every committed utterance that carried at least one audio byte produces
//! the next scripted turn (or a default echo turn), so the full
//! orchestrate → push → respond → collect loop can be exercised without
//! any external service.
//!
//! A commit with no buffered audio produces nothing — the server's VAD
//! never saw speech, which is exactly what a fully lossy network looks
//! like from the SUT side.

use std::collections::VecDeque;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapter::transport::Transport;
use crate::adapter::wire::{ClientMessage, ServerMessage};
use crate::adapter::JsonMap;

/// Maximum bytes of received audio echoed back per turn.
const ECHO_AUDIO_CAP: usize = 32_000;

/// One scripted response turn.
#[derive(Debug, Clone)]
pub struct EchoTurn {
    /// Tool calls issued (in order) before the spoken part of the turn.
    pub tool_calls: Vec<(String, JsonMap)>,
    /// Text emitted as a single delta. Empty string suppresses the delta.
    pub text: String,
    /// Echo the received utterance audio back as an audio delta.
    pub echo_audio: bool,
}

impl EchoTurn {
    pub fn say(text: impl Into<String>) -> Self {
        Self {
            tool_calls: Vec::new(),
            text: text.into(),
            echo_audio: true,
        }
    }

    pub fn call_tool(mut self, name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        };
        self.tool_calls.push((name.into(), args));
        self
    }
}

/// Scripted server state driven by the listener loop.
struct ServerState {
    transport: Arc<dyn Transport>,
    script: VecDeque<EchoTurn>,
    /// Audio bytes buffered since the last commit.
    pending_audio: Vec<u8>,
    /// Remaining tool calls of the in-flight turn, plus its tail.
    in_flight: Option<InFlightTurn>,
    next_call_id: u64,
}

struct InFlightTurn {
    remaining_calls: VecDeque<(String, JsonMap)>,
    text: String,
    echo_audio: bool,
    utterance: Vec<u8>,
}

/// Spawn a scripted SUT on `transport`. The task exits when the peer
/// hangs up.
pub fn spawn_echo_server(
    transport: Arc<dyn Transport>,
    script: Vec<EchoTurn>,
) -> JoinHandle<()> {
    let mut state = ServerState {
        transport,
        script: script.into(),
        pending_audio: Vec::new(),
        in_flight: None,
        next_call_id: 0,
    };
    tokio::spawn(async move {
        while let Some(frame) = state.transport.recv().await {
            let message: ClientMessage = match serde_json::from_str(&frame) {
                Ok(m) => m,
                Err(e) => {
                    debug!(error = %e, "echo server ignoring undecodable frame");
                    continue;
                }
            };
            if state.handle(message).await.is_err() {
                break;
            }
        }
        debug!("echo server stopped — peer hung up");
    })
}

impl ServerState {
    async fn handle(&mut self, message: ClientMessage) -> crate::error::Result<()> {
        match message {
            ClientMessage::SessionUpdate { .. } => {}
            ClientMessage::AudioAppend { audio, .. } => {
                if self.pending_audio.is_empty() {
                    self.send(&ServerMessage::SpeechStarted).await?;
                }
                match BASE64.decode(audio.as_bytes()) {
                    Ok(bytes) => self.pending_audio.extend_from_slice(&bytes),
                    Err(e) => debug!(error = %e, "echo server dropping bad audio payload"),
                }
            }
            ClientMessage::AudioCommit => {
                if self.pending_audio.is_empty() {
                    debug!("commit without audio — staying silent");
                    return Ok(());
                }
                self.send(&ServerMessage::SpeechStopped).await?;
                let utterance = std::mem::take(&mut self.pending_audio);
                self.begin_turn(utterance).await?;
            }
            ClientMessage::VideoFrame { .. } => {}
            ClientMessage::ResponseCreate => {
                // Explicit generation request on an empty buffer: answer
                // with the next scripted turn anyway.
                if self.in_flight.is_none() {
                    self.begin_turn(Vec::new()).await?;
                }
            }
            ClientMessage::ToolResult { call_id, .. } => {
                debug!(call_id = %call_id, "echo server received tool result");
                self.advance_turn().await?;
            }
        }
        Ok(())
    }

    async fn begin_turn(&mut self, utterance: Vec<u8>) -> crate::error::Result<()> {
        let turn = self.script.pop_front().unwrap_or_else(|| {
            EchoTurn::say(format!("I heard {} bytes of audio.", utterance.len()))
        });
        self.send(&ServerMessage::ResponseCreated).await?;
        self.in_flight = Some(InFlightTurn {
            remaining_calls: turn.tool_calls.into(),
            text: turn.text,
            echo_audio: turn.echo_audio,
            utterance,
        });
        self.advance_turn().await
    }

    /// Issue the next tool call of the in-flight turn, or finish it.
    async fn advance_turn(&mut self) -> crate::error::Result<()> {
        let Some(mut turn) = self.in_flight.take() else {
            warn!("tool result with no turn in flight");
            return Ok(());
        };

        if let Some((name, args)) = turn.remaining_calls.pop_front() {
            let call_id = format!("call-{}", self.next_call_id);
            self.next_call_id += 1;
            // The turn stays in flight until its tool result arrives.
            self.in_flight = Some(turn);
            let message = ServerMessage::ToolCall {
                call_id,
                name,
                arguments: Value::Object(args),
            };
            return self.send(&message).await;
        }

        if !turn.text.is_empty() {
            self.send(&ServerMessage::TextDelta { text: turn.text }).await?;
        }
        if turn.echo_audio && !turn.utterance.is_empty() {
            let cap = turn.utterance.len().min(ECHO_AUDIO_CAP);
            self.send(&ServerMessage::AudioDelta {
                audio: BASE64.encode(&turn.utterance[..cap]),
            })
            .await?;
        }
        self.send(&ServerMessage::ResponseDone).await
    }

    async fn send(&self, message: &ServerMessage) -> crate::error::Result<()> {
        let frame = serde_json::to_string(message).map_err(|e| {
            crate::error::HarnessError::Connection(format!("encode server frame: {e}"))
        })?;
        self.transport.send(frame).await
    }
}
