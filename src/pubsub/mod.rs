//! Внутрипроцессная подсистема Publish–Subscribe.
//!
//! - `broker`: регистрация тем, подписки (точные и по glob-шаблону) и
//!   доставка сообщений через `tokio::sync::broadcast`. Тема или шаблон
//!   живут, пока на них есть хотя бы одна подписка.
//! - `message`: сообщение с темой и полезной нагрузкой.
//! - `subscriber`: подписки и интерфейсы получения для потребителей.
//!
//! Брокер используется напрямую `MemoryTransport` и сервером брокера
//! (`network`), который раздаёт сообщения по TCP.

pub mod broker;
pub mod message;
pub mod subscriber;

pub use broker::*;
pub use message::*;
pub use subscriber::*;

/// Возвращает `true`, если строка содержит метасимволы glob и должна
/// трактоваться как шаблон, а не как точное имя темы.
pub fn is_pattern(topic: &str) -> bool {
    topic.contains(['*', '?', '[', '{'])
}
