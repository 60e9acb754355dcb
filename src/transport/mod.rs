//! Абстракция транспорта publish/subscribe.
//!
//! Транспорт публикует полезную нагрузку в тему и доставляет входящие
//! сообщения обработчикам подписок. Обработчик вызывается на задаче
//! доставки, отдельной от вызывающей стороны.
//!
//! Реализации:
//! - [`MemoryTransport`] — внутри процесса поверх [`Broker`](crate::Broker);
//! - [`TcpTransport`] — к серверу брокера по TCP.
//!
//! Переподключение не выполняется автоматически: после обрыва состояние
//! становится [`ConnectionState::Disconnected`], и вызывающая сторона сама
//! решает, вызывать ли `connect()` повторно.

pub mod memory;
pub mod tcp;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use pingpong_error::PingPongResult;
use tokio::sync::watch;

pub use memory::MemoryTransport;
pub use tcp::{TcpTransport, TcpTransportConfig};

use crate::Message;

/// Обработчик доставленного сообщения.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Идентификатор подписки внутри одного транспорта.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Наблюдаемое состояние подключения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Устанавливает подключение. Повторный вызов при активном подключении
    /// ничего не делает.
    async fn connect(&self) -> PingPongResult<()>;

    /// Разрывает подключение. Подписки сохраняются и восстанавливаются при
    /// следующем `connect()`.
    async fn disconnect(&self) -> PingPongResult<()>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Приёмник изменений состояния подключения.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Публикует полезную нагрузку в тему.
    ///
    /// Не блокируется бесконечно: ошибка подключения или таймаут
    /// возвращаются вызывающей стороне без повторов.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> PingPongResult<()>;

    /// Регистрирует обработчик для темы или glob-шаблона.
    ///
    /// После возврата все сообщения, опубликованные в подходящие темы,
    /// доставляются обработчику.
    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> PingPongResult<SubscriptionId>;

    /// Снимает подписку. После возврата обработчик больше не вызывается.
    async fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> PingPongResult<()>;
}

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}
