use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Допустимый диапазон каждого канала цвета.
pub const RGB_RANGE: RangeInclusive<i64> = 0..=255;
/// Допустимый диапазон скорости вращения.
pub const RPM_RANGE: RangeInclusive<i64> = 0..=5000;
/// Начальная температура устройства.
pub const INITIAL_TEMPERATURE: f64 = 25.0;

/// Цвет в RGB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: i64,
    pub g: i64,
    pub b: i64,
}

/// Запись симулируемого устройства.
///
/// Меняется только обработчиками диспетчера под мьютексом устройства.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub rgb: Rgb,
    pub temperature: f64,
    pub rpm: i64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            rgb: Rgb::default(),
            temperature: INITIAL_TEMPERATURE,
            rpm: 0,
        }
    }
}

/// Что делать со значением вне допустимого диапазона.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Значение применяется как есть.
    #[default]
    PassThrough,
    /// Значение прижимается к границе диапазона.
    Clamp,
    /// Команда отклоняется ответом-ошибкой.
    Reject,
}

/// Кто владеет записью устройства.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceScope {
    /// Одно устройство на весь процесс респондера, общее для всех сессий.
    #[default]
    Shared,
    /// Отдельная запись на каждый идентификатор сессии.
    PerSession,
}

impl RangePolicy {
    /// Применяет политику к значению поля.
    ///
    /// Возвращает итоговое значение или причину отказа для ответа-ошибки.
    pub fn apply(
        self,
        field: &str,
        value: i64,
        range: RangeInclusive<i64>,
    ) -> Result<i64, String> {
        if range.contains(&value) {
            return Ok(value);
        }
        match self {
            Self::PassThrough => Ok(value),
            Self::Clamp => Ok(value.clamp(*range.start(), *range.end())),
            Self::Reject => Err(format!(
                "{field} out of range [{}, {}]: {value}",
                range.start(),
                range.end()
            )),
        }
    }
}
