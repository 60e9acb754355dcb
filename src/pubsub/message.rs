use std::{str::Utf8Error, sync::Arc};

use bytes::Bytes;

/// Сообщение, доставляемое подписчикам темы.
#[derive(Debug, Clone)]
pub struct Message {
    /// Тема, в которую сообщение было опубликовано.
    pub topic: Arc<str>,
    /// Полезная нагрузка (UTF-8 JSON для протокола команд).
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        topic: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Полезная нагрузка как строка.
    pub fn payload_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет создание сообщения из &str и статических байт.
    #[test]
    fn test_message_creation() {
        let msg = Message::new("ping/command", Bytes::from_static(b"{}"));
        assert_eq!(&*msg.topic, "ping/command");
        assert_eq!(msg.payload, Bytes::from_static(b"{}"));
        assert_eq!(msg.payload_str().unwrap(), "{}");
    }

    /// Тест проверяет, что невалидный UTF-8 обнаруживается.
    #[test]
    fn test_payload_str_rejects_binary() {
        let msg = Message::new(String::from("bin"), vec![0xff, 0xfe]);
        assert!(msg.payload_str().is_err());
    }
}
