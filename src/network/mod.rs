//! Сетевой модуль брокера.
//!
//! ## Подмодули
//!
//! - `banner`: баннер, выводимый при старте брокера.
//! - `connection`: менеджер соединений и обработчик одного клиента.
//! - `frame`: кадры протокола брокера (JSON по одной строке).
//! - `server`: приём TCP-соединений.
//! - `shutdown`: запоминающий сигнал остановки.

pub mod banner;
pub mod connection;
pub mod frame;
pub mod server;
pub mod shutdown;

pub use connection::{ConnectionConfig, ConnectionHandler, ConnectionManager};
pub use server::{run_broker, BrokerServer};
pub use shutdown::ShutdownSignal;
