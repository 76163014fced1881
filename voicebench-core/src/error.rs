use thiserror::Error;

/// All errors produced by voicebench-core.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid scenario: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("not connected")]
    NotConnected,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("dispatch error in '{action}': {message}")]
    Dispatch { action: String, message: String },

    #[error("audio error: {0}")]
    Audio(String),

    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
