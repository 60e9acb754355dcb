use std::error::Error;

use crate::StatusCode;

/// Ошибка, у которой есть код статуса.
///
/// Реализуется всеми доменными ошибками, чтобы [`StackError`](crate::StackError)
/// мог хранить их единообразно.
pub trait ErrorExt: Error + Send + Sync + 'static {
    fn status_code(&self) -> StatusCode;

    /// Сообщение для пользователя. Внутренние ошибки не раскрывают деталей.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Internal => "Internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenericError;

    #[test]
    fn test_client_message_hides_internal() {
        let e = GenericError::new(StatusCode::Internal, "task panicked at src/streaming");
        assert_eq!(e.client_message(), "Internal error");

        let e = GenericError::new(StatusCode::InvalidConfig, "interval_ms must be > 0");
        assert_eq!(e.client_message(), "interval_ms must be > 0");
    }
}
