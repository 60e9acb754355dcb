use crate::{ErrorExt, StatusCode};

/// Ошибки контроллера потоковой публикации.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamingError {
    /// Нулевой интервал публикации
    #[error("Streaming interval must be greater than zero")]
    InvalidInterval,
}

impl ErrorExt for StreamingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInterval => StatusCode::InvalidArgs,
        }
    }
}
