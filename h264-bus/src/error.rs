use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`SessionController::encode`](crate::session::SessionController::encode)
/// and [`SessionController::decode`](crate::session::SessionController::decode).
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected before the graph was touched: empty batch, mixed frame sizes, bad frame length,
    /// empty payload, or a call for the wrong direction.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The graph posted an error, refused a state change, or went away without finishing.
    #[error("pipeline failure: {message}")]
    PipelineFailure { message: String },

    /// Decode finished but the output width/height could not be determined.
    #[error("output format resolution failed: {0}")]
    FormatResolutionFailure(String),

    /// No terminal event arrived within the configured wait bound.
    #[error("no terminal pipeline event within {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn pipeline(err: anyhow::Error) -> Self {
        Self::PipelineFailure {
            message: format!("{:#}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
