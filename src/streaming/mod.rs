//! Непрерывный опрос телеметрии: периодическая публикация
//! `TemperatureRead` от имени сессии.

pub mod controller;

pub use controller::{StartOutcome, StreamingConfig, StreamingController};
