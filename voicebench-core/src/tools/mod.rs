//! Mock tool layer: the registry answering SUT tool calls, the built-in
//! mock catalogues, and the call-log assertion helpers.

pub mod asserter;
pub mod builtin;
pub mod registry;

pub use asserter::ToolCallAsserter;
pub use registry::{CallRecord, MockToolRegistry, ToolMock};
