use bytes::Bytes;
use pingpong_error::ProtocolError;
use serde::{de::DeserializeOwned, Serialize};

use super::{Command, Response};

/// Сериализует сообщение в UTF-8 JSON.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::Encode {
            reason: e.to_string(),
        })
}

/// Разбирает сообщение из UTF-8 JSON.
///
/// Невалидный UTF-8 и невалидный JSON различаются: первый даёт
/// [`ProtocolError::InvalidUtf8`], второй [`ProtocolError::Malformed`].
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
    })
}

pub fn encode_command(command: &Command) -> Result<Bytes, ProtocolError> {
    encode(command)
}

pub fn decode_command(payload: &[u8]) -> Result<Command, ProtocolError> {
    decode(payload)
}

pub fn encode_response(response: &Response) -> Result<Bytes, ProtocolError> {
    encode(response)
}

pub fn decode_response(payload: &[u8]) -> Result<Response, ProtocolError> {
    decode(payload)
}
