use crate::{ErrorExt, StatusCode};

/// Ошибки разбора и построения сообщений протокола.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// Полезная нагрузка не является валидным UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
    /// Полезная нагрузка не является валидным JSON-сообщением
    #[error("Malformed message: {reason}")]
    Malformed { reason: String },
    /// Не удалось сериализовать сообщение
    #[error("Failed to encode message: {reason}")]
    Encode { reason: String },
    /// Невалидный кадр брокера
    #[error("Invalid frame: {reason}")]
    InvalidFrame { reason: String },
    /// Невалидный идентификатор сессии
    #[error("Invalid session id '{session_id}': {reason}")]
    InvalidSessionId { session_id: String, reason: String },
}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUtf8 => StatusCode::InvalidUtf8,
            Self::Malformed { .. } => StatusCode::ParseError,
            Self::Encode { .. } => StatusCode::SerializationFailed,
            Self::InvalidFrame { .. } => StatusCode::InvalidFrame,
            Self::InvalidSessionId { .. } => StatusCode::InvalidTopic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_status_codes() {
        let err = ProtocolError::Malformed {
            reason: "expected value".into(),
        };
        assert_eq!(err.status_code(), StatusCode::ParseError);
        assert_eq!(
            ProtocolError::InvalidUtf8.status_code(),
            StatusCode::InvalidUtf8
        );
    }
}
