use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Полезная нагрузка команды или ответа: JSON-объект `string → value`.
pub type Payload = Map<String, Value>;

/// Сообщение об ошибке для неизвестного типа команды.
pub const UNKNOWN_COMMAND_TYPE: &str = "Unknown command type";

/// Тип команды.
///
/// На проводе сериализуется строкой. Канонические имена: `"RGBSet"`,
/// `"TemperatureRead"`, `"WeightMeasure"`. Устаревшие подписи
/// `"RGB Command"`, `"Temperature Reading"`, `"Weight Data"` принимаются на
/// входе и приводятся к тем же вариантам. Любая другая строка сохраняется в
/// [`CommandType::Unknown`] и возвращается в ответе как есть.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CommandType {
    RgbSet,
    TemperatureRead,
    WeightMeasure,
    Unknown(String),
}

impl CommandType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RgbSet => "RGBSet",
            Self::TemperatureRead => "TemperatureRead",
            Self::WeightMeasure => "WeightMeasure",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<&str> for CommandType {
    fn from(raw: &str) -> Self {
        match raw {
            "RGBSet" | "RGB Command" => Self::RgbSet,
            "TemperatureRead" | "Temperature Reading" => Self::TemperatureRead,
            "WeightMeasure" | "Weight Data" => Self::WeightMeasure,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for CommandType {
    fn from(raw: String) -> Self {
        match Self::from(raw.as_str()) {
            Self::Unknown(_) => Self::Unknown(raw),
            known => known,
        }
    }
}

impl From<CommandType> for String {
    fn from(kind: CommandType) -> Self {
        match kind {
            CommandType::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Команда коммандера, публикуемая в [`COMMAND_TOPIC`](super::COMMAND_TOPIC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub data: Payload,
    pub session_id: String,
    /// Время отправки, секунды с эпохи Unix.
    #[serde(default)]
    pub timestamp: f64,
    /// Необязательный идентификатор запроса для сопоставления ответа.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Ответ респондера, публикуемый в `pong/{session_id}/response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub data: Payload,
    pub session_id: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Command {
    /// Создаёт команду с текущим временем.
    pub fn new(
        command_type: CommandType,
        data: Payload,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            command_type,
            data,
            session_id: session_id.into(),
            timestamp: now_seconds(),
            request_id: None,
        }
    }

    pub fn with_request_id(
        mut self,
        request_id: impl Into<String>,
    ) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl Response {
    /// Строит ответ на команду: тип, сессия и `request_id` копируются из
    /// команды.
    pub fn for_command(
        command: &Command,
        data: Payload,
    ) -> Self {
        Self {
            command_type: command.command_type.clone(),
            data,
            session_id: command.session_id.clone(),
            timestamp: now_seconds(),
            request_id: command.request_id.clone(),
        }
    }

    /// Ответ-ошибка `{error: reason}`.
    pub fn error(
        command: &Command,
        reason: impl Into<String>,
    ) -> Self {
        let mut data = Payload::new();
        data.insert("error".to_string(), Value::String(reason.into()));
        Self::for_command(command, data)
    }

    /// Текст ошибки, если ответ является ответом-ошибкой.
    pub fn error_reason(&self) -> Option<&str> {
        self.data.get("error").and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.error_reason().is_some()
    }
}

/// Текущее время в секундах с дробной частью.
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
