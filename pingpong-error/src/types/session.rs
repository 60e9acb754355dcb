use crate::{ErrorExt, StatusCode};

/// Ошибки сессии коммандера.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Сессия закрыта
    #[error("Session '{session_id}' is closed")]
    Closed { session_id: String },
    /// Ответ не пришёл вовремя
    #[error("No response for session '{session_id}' within {timeout_ms}ms")]
    RequestTimeout { session_id: String, timeout_ms: u64 },
    /// Буфер ответов переполнен (политика `Reject`)
    #[error("Response buffer is full (capacity {capacity})")]
    BufferFull { capacity: usize },
}

impl ErrorExt for SessionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed { .. } => StatusCode::SessionClosed,
            Self::RequestTimeout { .. } => StatusCode::RequestTimeout,
            Self::BufferFull { .. } => StatusCode::QueueFull,
        }
    }
}
