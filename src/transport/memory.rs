use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pingpong_error::{PingPongResult, TransportError};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, trace, warn};

use super::{ConnectionState, MessageHandler, SubscriptionId, Transport};
use crate::{pubsub::is_pattern, AnySubscription, Broker, RecvError};

struct MemorySubscription {
    pattern: String,
    handler: MessageHandler,
    task: Option<JoinHandle<()>>,
}

/// Транспорт внутри процесса поверх общего [`Broker`].
///
/// Несколько экземпляров над одним брокером ведут себя как независимые
/// клиенты одного сервера.
pub struct MemoryTransport {
    broker: Arc<Broker>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Mutex<HashMap<SubscriptionId, MemorySubscription>>,
    next_id: AtomicU64,
}

impl MemoryTransport {
    pub fn new(broker: Arc<Broker>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            broker,
            state_tx,
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Создаёт транспорт и сразу подключает его.
    pub async fn connected(broker: Arc<Broker>) -> PingPongResult<Self> {
        let transport = Self::new(broker);
        transport.connect().await?;
        Ok(transport)
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Регистрирует приёмник в брокере и запускает задачу доставки.
    ///
    /// Приёмник создаётся до возврата, поэтому сообщения, опубликованные
    /// сразу после подписки, не теряются.
    fn spawn_delivery(
        broker: &Broker,
        pattern: &str,
        handler: MessageHandler,
    ) -> Result<JoinHandle<()>, TransportError> {
        let mut sub = if is_pattern(pattern) {
            let psub = broker
                .psubscribe(pattern)
                .map_err(|e| TransportError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            AnySubscription::Pattern(psub)
        } else {
            AnySubscription::Exact(broker.subscribe(pattern))
        };

        let pattern = pattern.to_string();
        Ok(tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Ok(message) => {
                        trace!(%pattern, topic = %message.topic, "Delivering message");
                        handler(message);
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(%pattern, skipped = n, "Subscriber lagged, messages skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(%pattern, "Delivery task finished");
        }))
    }

    async fn stop_tasks(tasks: Vec<JoinHandle<()>>) {
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> PingPongResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        {
            let mut subs = self.subscriptions.lock();
            for sub in subs.values_mut() {
                if sub.task.is_none() {
                    sub.task = Some(Self::spawn_delivery(
                        &self.broker,
                        &sub.pattern,
                        sub.handler.clone(),
                    )?);
                }
            }
        }
        self.state_tx.send_replace(ConnectionState::Connected);
        debug!("Memory transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> PingPongResult<()> {
        self.state_tx.send_replace(ConnectionState::Disconnected);
        let tasks: Vec<_> = self
            .subscriptions
            .lock()
            .values_mut()
            .filter_map(|sub| sub.task.take())
            .collect();
        Self::stop_tasks(tasks).await;
        debug!("Memory transport disconnected");
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> PingPongResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let delivered = self.broker.publish(topic, payload);
        trace!(%topic, delivered, "Published");
        Ok(())
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> PingPongResult<SubscriptionId> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let task = Self::spawn_delivery(&self.broker, pattern, handler.clone())?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().insert(
            id,
            MemorySubscription {
                pattern: pattern.to_string(),
                handler,
                task: Some(task),
            },
        );
        debug!(%pattern, %id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> PingPongResult<()> {
        let removed = self.subscriptions.lock().remove(&id);
        if let Some(task) = removed.and_then(|sub| sub.task) {
            Self::stop_tasks(vec![task]).await;
            debug!(%id, "Unsubscribed");
        }
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        for sub in self.subscriptions.get_mut().values_mut() {
            if let Some(task) = sub.task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pingpong_error::StatusCode;
    use tokio::{sync::mpsc, time::timeout};

    use super::*;
    use crate::Message;

    fn channel_handler() -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |msg| {
            let _ = tx.send(msg);
        });
        (handler, rx)
    }

    /// Тест проверяет доставку по шаблону между двумя транспортами над
    /// одним брокером.
    #[tokio::test]
    async fn test_publish_subscribe_between_transports() {
        let broker = Arc::new(Broker::default());
        let a = MemoryTransport::connected(broker.clone()).await.unwrap();
        let b = MemoryTransport::connected(broker).await.unwrap();

        let (handler, mut rx) = channel_handler();
        b.subscribe("pong/*/response", handler).await.unwrap();
        a.publish("pong/s1/response", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let msg = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&*msg.topic, "pong/s1/response");
    }

    /// Тест проверяет, что без подключения публикация возвращает
    /// `NotConnected`.
    #[tokio::test]
    async fn test_publish_requires_connection() {
        let t = MemoryTransport::new(Arc::new(Broker::default()));
        let err = t
            .publish("ping/command", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NotConnected);
        assert_eq!(t.state(), ConnectionState::Disconnected);
    }

    /// Тест проверяет, что после `unsubscribe` обработчик больше не
    /// вызывается, а тема и шаблон освобождены в брокере.
    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = Arc::new(Broker::default());
        let t = MemoryTransport::connected(broker.clone()).await.unwrap();
        let (handler, mut rx) = channel_handler();
        let id = t.subscribe("ping/command", handler.clone()).await.unwrap();
        let pid = t.subscribe("pong/*/response", handler).await.unwrap();
        assert_eq!((broker.topic_count(), broker.pattern_count()), (1, 1));

        t.unsubscribe(id).await.unwrap();
        t.unsubscribe(pid).await.unwrap();
        assert_eq!((broker.topic_count(), broker.pattern_count()), (0, 0));

        t.publish("ping/command", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
        assert_eq!(t.subscription_count(), 0);
    }

    /// Тест проверяет наблюдаемость состояния и восстановление подписок
    /// после повторного подключения.
    #[tokio::test]
    async fn test_disconnect_and_reconnect() {
        let t = MemoryTransport::connected(Arc::new(Broker::default()))
            .await
            .unwrap();
        let mut state = t.watch_state();
        let (handler, mut rx) = channel_handler();
        t.subscribe("ping/command", handler).await.unwrap();

        t.disconnect().await.unwrap();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
        assert!(t
            .publish("ping/command", Bytes::from_static(b"lost"))
            .await
            .is_err());

        t.connect().await.unwrap();
        assert!(state.has_changed().unwrap());
        t.publish("ping/command", Bytes::from_static(b"back"))
            .await
            .unwrap();
        let msg = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, Bytes::from_static(b"back"));
    }

    #[tokio::test]
    async fn test_invalid_pattern_rejected() {
        let t = MemoryTransport::connected(Arc::new(Broker::default()))
            .await
            .unwrap();
        let (handler, _rx) = channel_handler();
        let err = t.subscribe("pong/[", handler).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidTopic);
    }
}
