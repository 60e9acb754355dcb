use std::fmt;

/// Коды статуса для категоризации ошибок.
///
/// Диапазон кода задаёт подсистему: 1xxx общие ошибки и конфигурация,
/// 4xxx переполнения, 5xxx сериализация, 6xxx транспорт, 7xxx сессии
/// коммандера, 8xxx протокол и кадры брокера.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx ===
    Internal = 1003,
    InvalidArgs = 1004,
    InvalidConfig = 1005,

    // === 4xxx ===
    QueueFull = 4001,

    // === 5xxx ===
    SerializationFailed = 5000,

    // === 6xxx: транспорт ===
    ConnectionClosed = 6001,
    Timeout = 6002,
    ConnectionFailed = 6003,
    NotConnected = 6004,
    PublishFailed = 6005,
    SubscribeFailed = 6006,

    // === 7xxx: сессии ===
    SessionClosed = 7000,
    RequestTimeout = 7001,

    // === 8xxx: протокол ===
    InvalidFrame = 8000,
    InvalidUtf8 = 8002,
    ParseError = 8003,
    InvalidTopic = 8004,
}

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Ошибка транспорта (диапазон 6xxx).
    pub fn is_transport_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Код завершения процесса CLI для ошибки с этим статусом.
    ///
    /// Ошибки конфигурации и аргументов дают `2`, недоступный брокер `3`,
    /// таймаут ответа `4`, остальное `1`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgs | Self::InvalidConfig => 2,
            _ if self.is_transport_error() => 3,
            Self::RequestTimeout => 4,
            _ => 1,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(StatusCode::InvalidConfig, 2)]
    #[case(StatusCode::NotConnected, 3)]
    #[case(StatusCode::Timeout, 3)]
    #[case(StatusCode::RequestTimeout, 4)]
    #[case(StatusCode::ParseError, 1)]
    fn test_exit_codes(
        #[case] code: StatusCode,
        #[case] expected: i32,
    ) {
        assert_eq!(code.exit_code(), expected);
    }

    #[test]
    fn test_transport_range() {
        assert!(StatusCode::PublishFailed.is_transport_error());
        assert!(!StatusCode::SessionClosed.is_transport_error());
    }

    /// Тест проверяет, что `Display` содержит имя и числовой код.
    #[test]
    fn test_display_contains_code() {
        let s = StatusCode::RequestTimeout.to_string();
        assert_eq!(s, "RequestTimeout (7001)");
    }
}
