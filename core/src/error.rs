use thiserror::Error;

/// Error taxonomy surfaced by the core to its collaborators.
///
/// Mirrors the categories a caller needs to distinguish: some map to
/// HTTP statuses at the server boundary, others only ever become a
/// task's terminal `details` string.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("transcoder binary not found on PATH")]
    TranscoderMissing,

    #[error("transcoder stalled: no output for {secs}s")]
    TranscoderStalled { secs: u64 },

    #[error("transcoder exited with failure: {tail}")]
    TranscoderFailed { tail: String },

    #[error("post-processing failed: {0}")]
    PostProcessFailed(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
