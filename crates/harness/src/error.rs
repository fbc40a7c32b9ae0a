//! Harness error types

use std::time::Duration;

use thiserror::Error;

use crate::engine::SessionState;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine handshake failed: {0}")]
    Handshake(String),

    #[error("No move within {budget:?}; engine answered only after stop")]
    Timeout {
        budget: Duration,
        /// Move the engine reported after being stopped
        late_move: Option<String>,
    },

    #[error("Engine process fault: {0}")]
    ProcessFault(String),

    #[error("Engine rejected option {name}: {reason}")]
    ConfigurationRejected { name: String, reason: String },

    #[error("Cannot {op} while session is {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("No worker could start a usable engine session: {0}")]
    NoUsableSession(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Suite(#[from] suite_core::SuiteError),
}
