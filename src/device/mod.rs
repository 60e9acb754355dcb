//! Модель симулируемого устройства.
//!
//! - `state`: запись устройства и политики проверки диапазонов.
//! - `registry`: владение записями в зависимости от [`DeviceScope`].

pub mod registry;
pub mod state;

pub use registry::*;
pub use state::*;
