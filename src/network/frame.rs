//! Кадры брокера: один JSON-объект на строку, вид задаётся тегом `op`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::FrameError;

/// Максимальная длина одного кадра в байтах.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Кадр клиент → брокер.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Подписка на тему или glob-шаблон.
    Subscribe { pattern: String },
    /// Отписка от ранее подписанной темы или шаблона.
    Unsubscribe { pattern: String },
    /// Публикация UTF-8 полезной нагрузки в тему.
    Publish { topic: String, payload: String },
    Ping,
}

/// Кадр брокер → клиент.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Доставленное сообщение. `pattern` — подписка, по которой оно пришло.
    Message {
        pattern: String,
        topic: String,
        payload: String,
    },
    /// Подтверждение `subscribe`/`unsubscribe`.
    Ack {
        request: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    /// Ошибка обработки кадра. `request` заполнен, если кадр удалось
    /// разобрать.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<String>,
        reason: String,
    },
    Pong,
}

impl ClientFrame {
    /// Имя операции, как оно записано в теге `op`.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Publish { .. } => "publish",
            Self::Ping => "ping",
        }
    }
}

/// Сериализует кадр в строку с завершающим `\n`.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, FrameError> {
    let mut buf = serde_json::to_vec(frame)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Разбирает кадр из одной строки (без завершающего перевода строки).
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(FrameError::Empty);
    }
    if line.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            limit: MAX_FRAME_LEN,
        });
    }
    Ok(serde_json::from_str(line)?)
}

/// Читает одну строку кадра не длиннее `limit` байт (без `\n`).
///
/// Уже прочитанные байты копятся в `buf`, поэтому вызов можно безопасно
/// отменять в `select!` и повторять с тем же буфером. `Ok(None)` означает
/// конец потока. При превышении лимита буфер очищается и возвращается
/// `TooLarge`; продолжать чтение с этого потока дальше нельзя, граница
/// кадра потеряна.
pub async fn read_frame_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<Option<String>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let budget = (limit + 1).saturating_sub(buf.len()) as u64;
    let n = (&mut *reader).take(budget).read_until(b'\n', buf).await?;

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > limit {
        buf.clear();
        return Err(FrameError::TooLarge { limit });
    } else if n == 0 && buf.is_empty() {
        return Ok(None);
    }

    let line = std::mem::take(buf);
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| FrameError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_wire_shape() {
        let frame = ClientFrame::Publish {
            topic: "ping/command".into(),
            payload: "{}".into(),
        };
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            "{\"op\":\"publish\",\"topic\":\"ping/command\",\"payload\":\"{}\"}\n"
        );
        assert_eq!(frame.op(), "publish");
    }

    #[test]
    fn test_decode_ping_and_pong() {
        assert_eq!(
            decode_frame::<ClientFrame>("{\"op\":\"ping\"}").unwrap(),
            ClientFrame::Ping
        );
        assert_eq!(
            decode_frame::<ServerFrame>(" {\"op\":\"pong\"}\r").unwrap(),
            ServerFrame::Pong
        );
    }

    #[test]
    fn test_ack_without_pattern_omits_field() {
        let bytes = encode_frame(&ServerFrame::Ack {
            request: "subscribe".into(),
            pattern: None,
        })
        .unwrap();
        assert_eq!(&bytes[..], b"{\"op\":\"ack\",\"request\":\"subscribe\"}\n");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_frame::<ClientFrame>("   "),
            Err(FrameError::Empty)
        ));
        assert!(matches!(
            decode_frame::<ClientFrame>("{\"op\":\"teleport\"}"),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            decode_frame::<ClientFrame>("not json"),
            Err(FrameError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_line_splits_lines() {
        let mut reader: &[u8] = b"{\"op\":\"ping\"}\r\nsecond\nlast";
        let mut buf = Vec::new();
        let first = read_frame_line(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(first.as_deref(), Some("{\"op\":\"ping\"}"));
        let second = read_frame_line(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(second.as_deref(), Some("second"));
        let last = read_frame_line(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(last.as_deref(), Some("last"));
        assert_eq!(read_frame_line(&mut reader, &mut buf, 64).await.unwrap(), None);
    }

    /// Тест проверяет, что строка длиннее лимита отвергается, не будучи
    /// прочитанной целиком.
    #[tokio::test]
    async fn test_read_frame_line_enforces_limit() {
        let data = vec![b'x'; 100];
        let mut reader: &[u8] = &data;
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame_line(&mut reader, &mut buf, 16).await,
            Err(FrameError::TooLarge { limit: 16 })
        ));
        assert!(buf.is_empty());
        assert_eq!(reader.len(), 100 - 17);

        let mut exact: &[u8] = b"0123456789abcdef\n";
        let line = read_frame_line(&mut exact, &mut buf, 16).await.unwrap();
        assert_eq!(line.as_deref(), Some("0123456789abcdef"));
    }

    #[tokio::test]
    async fn test_read_frame_line_invalid_utf8() {
        let mut reader: &[u8] = b"\xff\xfe\nok\n";
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame_line(&mut reader, &mut buf, 16).await,
            Err(FrameError::InvalidUtf8)
        ));
        let next = read_frame_line(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(next.as_deref(), Some("ok"));
    }
}
