use thiserror::Error;

use pingpong_error::ProtocolError;

/// Ошибки разбора кадров брокера (одна JSON-строка на кадр).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is empty")]
    Empty,

    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for ProtocolError {
    fn from(err: FrameError) -> Self {
        ProtocolError::InvalidFrame {
            reason: err.to_string(),
        }
    }
}
