use std::sync::{Arc, Weak};

use tokio::sync::broadcast;

use super::{
    broker::{PatternTable, TopicTable},
    Message,
};
use crate::{RecvError, TryRecvError};

/// Подписка на конкретную тему по имени.
///
/// При `Drop` приёмник закрывается, и если он был последним, тема
/// удаляется из брокера.
pub struct Subscription {
    /// Тема, на которую подписаны.
    pub topic: Arc<str>,
    /// Внутренний приёмник. `None` только внутри `Drop`.
    pub(crate) inner: Option<broadcast::Receiver<Message>>,
    pub(crate) table: Weak<TopicTable>,
}

/// Подписка на темы по glob-шаблону.
///
/// При `Drop` последней подписки шаблон удаляется из брокера.
pub struct PatternSubscription {
    /// Исходный шаблон.
    pub pattern: String,
    pub(crate) inner: Option<broadcast::Receiver<Message>>,
    pub(crate) table: Weak<PatternTable>,
}

async fn recv_from(inner: &mut Option<broadcast::Receiver<Message>>) -> Result<Message, RecvError> {
    match inner {
        Some(rx) => rx.recv().await.map_err(Into::into),
        None => Err(RecvError::Closed),
    }
}

fn try_recv_from(inner: &mut Option<broadcast::Receiver<Message>>) -> Result<Message, TryRecvError> {
    match inner {
        Some(rx) => rx.try_recv().map_err(Into::into),
        None => Err(TryRecvError::Closed),
    }
}

impl Subscription {
    /// Асинхронно ожидает следующее сообщение.
    ///
    /// # Возвращает
    /// - `Ok(Message)` при успешном получении сообщения
    /// - `Err(RecvError::Closed)` если тема закрыта
    /// - `Err(RecvError::Lagged(n))` если приёмник отстал на `n` сообщений
    pub async fn recv(&mut self) -> Result<Message, RecvError> {
        recv_from(&mut self.inner).await
    }

    /// Пытается получить сообщение без ожидания.
    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        try_recv_from(&mut self.inner)
    }

    /// Явно отписаться. Аналогично `drop(self)`.
    pub fn unsubscribe(self) {}

    pub fn topic_name(&self) -> &Arc<str> {
        &self.topic
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |rx| rx.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // приёмник закрывается до проверки, иначе он сам себя посчитает
        drop(self.inner.take());
        if let Some(table) = self.table.upgrade() {
            table.remove_if(&*self.topic, |_, tx| tx.receiver_count() == 0);
        }
    }
}

impl PatternSubscription {
    /// Асинхронно ожидает следующее сообщение, соответствующее шаблону.
    pub async fn recv(&mut self) -> Result<Message, RecvError> {
        recv_from(&mut self.inner).await
    }

    /// Пытается получить сообщение без ожидания.
    pub fn try_recv(&mut self) -> Result<Message, TryRecvError> {
        try_recv_from(&mut self.inner)
    }

    /// Явно отписаться от шаблона.
    pub fn unsubscribe(self) {}

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |rx| rx.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PatternSubscription {
    fn drop(&mut self) {
        drop(self.inner.take());
        if let Some(table) = self.table.upgrade() {
            table.remove_if(self.pattern.as_str(), |_, entry| entry.tx.receiver_count() == 0);
        }
    }
}

/// Подписка любого вида, чтобы транспорт мог обрабатывать их единообразно.
pub enum AnySubscription {
    Exact(Subscription),
    Pattern(PatternSubscription),
}

impl AnySubscription {
    pub async fn recv(&mut self) -> Result<Message, RecvError> {
        match self {
            Self::Exact(sub) => sub.recv().await,
            Self::Pattern(sub) => sub.recv().await,
        }
    }
}
