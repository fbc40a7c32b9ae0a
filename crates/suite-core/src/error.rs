//! Suite loading errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Failed to read test suite {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid position record: {0}")]
    InvalidRecord(String),

    #[error("No usable positions in test suite {0}")]
    Empty(String),
}
