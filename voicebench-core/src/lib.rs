//! # voicebench-core
//!
//! End-to-end test harness for real-time voice conversation AI.
//!
//! ## Architecture
//!
//! ```text
//! Scenario ──► ScenarioOrchestrator ──► simulation layers
//!                     │                  (audio · noise · network ·
//!                     │                   video · barge-in · tools)
//!                     ▼
//!              VoiceSystem adapter ◄──► system under test
//!                     │
//!              response collector ──► TestResults ──► scorers ──► reports
//! ```
//!
//! A scenario is a declarative timeline of user speech, noise injections,
//! network changes, visual inputs, barge-ins and expectations. The
//! orchestrator drains the timeline in `(timestamp, sequence)` order over
//! a simulated clock, pipes synthesized audio through the noise and
//! network layers into the system under test, concurrently collects its
//! streaming responses, and scores the outcome.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod adapter;
pub mod clock;
pub mod error;
pub mod eval;
pub mod media;
pub mod orchestrator;
pub mod report;
pub mod results;
pub mod sim;
pub mod tools;

// Convenience re-exports for downstream crates
pub use adapter::{
    ResponseEvent, ResponseKind, ResponsePayload, ResponseStream, SessionOptions, SystemState,
    ToolHandler, ToolOutcome, VoiceSystem,
};
pub use clock::{SharedClock, SimulatedClock};
pub use error::{HarnessError, Result};
pub use eval::{EvaluationHarness, EvaluationReport};
pub use media::{AudioChunk, VideoFrame};
pub use orchestrator::{Scenario, ScenarioOrchestrator, TimelineEvent};
pub use results::{AssertionResult, TestResults};
pub use tools::{MockToolRegistry, ToolCallAsserter, ToolMock};
