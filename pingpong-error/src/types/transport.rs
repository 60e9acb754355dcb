use crate::{ErrorExt, StatusCode};

/// Ошибки транспорта publish/subscribe.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Не удалось подключиться к брокеру
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },
    /// Таймаут подключения
    #[error("Connection timeout to {address}")]
    ConnectionTimeout { address: String },
    /// Операция вызвана без активного подключения
    #[error("Transport is not connected")]
    NotConnected,
    /// Соединение закрыто брокером
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },
    /// Ошибка публикации
    #[error("Publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    /// Публикация не завершилась за отведённое время
    #[error("Publish to '{topic}' timed out after {timeout_ms}ms")]
    PublishTimeout { topic: String, timeout_ms: u64 },
    /// Ошибка подписки
    #[error("Subscribe to '{pattern}' failed: {reason}")]
    SubscribeFailed { pattern: String, reason: String },
    /// Невалидный шаблон темы
    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } => StatusCode::ConnectionFailed,
            Self::ConnectionTimeout { .. } => StatusCode::Timeout,
            Self::NotConnected => StatusCode::NotConnected,
            Self::ConnectionClosed { .. } => StatusCode::ConnectionClosed,
            Self::PublishFailed { .. } => StatusCode::PublishFailed,
            Self::PublishTimeout { .. } => StatusCode::Timeout,
            Self::SubscribeFailed { .. } => StatusCode::SubscribeFailed,
            Self::InvalidPattern { .. } => StatusCode::InvalidTopic,
        }
    }
}
