use pingpong_error::ProtocolError;

/// Общая тема команд: все коммандеры публикуют сюда, все респондеры
/// подписаны на неё.
pub const COMMAND_TOPIC: &str = "ping/command";

/// Шаблон, совпадающий с темой ответов любой сессии.
pub const RESPONSE_PATTERN: &str = "pong/*/response";

/// Тема ответов для конкретной сессии: `pong/{session_id}/response`.
pub fn response_topic(session_id: &str) -> String {
    format!("pong/{session_id}/response")
}

/// Извлекает идентификатор сессии из темы ответов.
pub fn session_from_response_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix("pong/")?
        .strip_suffix("/response")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

/// Проверяет, что идентификатор сессии можно безопасно подставить в тему.
///
/// Пустые идентификаторы и идентификаторы с разделителем `/` или
/// метасимволами glob отклоняются: иначе ответы одной сессии могли бы
/// попасть подписчику другой.
pub fn validate_session_id(session_id: &str) -> Result<(), ProtocolError> {
    let reason = if session_id.is_empty() {
        "must not be empty"
    } else if session_id.contains('/') {
        "must not contain '/'"
    } else if crate::pubsub::is_pattern(session_id) {
        "must not contain glob metacharacters"
    } else {
        return Ok(());
    };
    Err(ProtocolError::InvalidSessionId {
        session_id: session_id.to_string(),
        reason: reason.to_string(),
    })
}
