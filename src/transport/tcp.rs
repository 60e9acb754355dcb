use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use globset::Glob;
use parking_lot::Mutex;
use pingpong_error::{PingPongResult, ProtocolError, TransportError};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{interval_at, timeout, Instant, Interval},
};
use tracing::{debug, info, trace, warn};

use super::{ConnectionState, MessageHandler, SubscriptionId, Transport};
use crate::{
    network::frame::{decode_frame, encode_frame, read_frame_line, ClientFrame, ServerFrame, MAX_FRAME_LEN},
    pubsub::is_pattern,
    Message,
};

/// Ёмкость очереди исходящих кадров.
const OUTBOUND_CAPACITY: usize = 256;
/// Предел строки от брокера: кадр `message` несёт экранированную полезную
/// нагрузку, поэтому он длиннее клиентского.
const MAX_SERVER_FRAME_LEN: usize = 8 * MAX_FRAME_LEN;
/// Сколько ждать дописывания очереди при закрытии соединения.
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Параметры TCP-транспорта.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Адрес сервера брокера, `host:port`.
    pub address: String,
    pub connect_timeout: Duration,
    /// Таймаут постановки кадра публикации в очередь отправки.
    pub publish_timeout: Duration,
    /// Таймаут подтверждения `subscribe`/`unsubscribe`.
    pub ack_timeout: Duration,
    /// Интервал `ping`. `None` отключает keepalive.
    pub keepalive: Option<Duration>,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6380".to_string(),
            connect_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(5),
            keepalive: Some(Duration::from_secs(15)),
        }
    }
}

struct TcpSubscription {
    pattern: String,
    handler: MessageHandler,
}

/// Состояние, общее для транспорта и задачи чтения.
struct Shared {
    subscriptions: Mutex<HashMap<SubscriptionId, TcpSubscription>>,
    /// Ожидающие подтверждения в порядке отправки запросов.
    pending_acks: Mutex<VecDeque<oneshot::Sender<Result<(), String>>>>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Connection {
    outbound: mpsc::Sender<ClientFrame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Транспорт к серверу брокера по TCP.
///
/// Кадры: одна JSON-строка на кадр (см. [`crate::network::frame`]). Одна
/// подписка на брокере обслуживает все локальные обработчики с тем же
/// шаблоном.
pub struct TcpTransport {
    config: TcpTransportConfig,
    shared: Arc<Shared>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    /// Упорядочивает пары "ожидающий + запрос", чтобы подтверждения
    /// сопоставлялись по порядку.
    request_lock: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl Shared {
    fn set_state(
        &self,
        state: ConnectionState,
    ) {
        self.state_tx.send_replace(state);
    }

    fn resolve_ack(
        &self,
        result: Result<(), String>,
    ) {
        if let Some(waiter) = self.pending_acks.lock().pop_front() {
            let _ = waiter.send(result);
        }
    }

    fn fail_pending(
        &self,
        reason: &str,
    ) {
        for waiter in self.pending_acks.lock().drain(..) {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }

    /// Доставляет сообщение всем локальным обработчикам шаблона.
    ///
    /// Обработчики вызываются под блокировкой таблицы подписок: после
    /// возврата `unsubscribe` снятый обработчик больше не вызывается.
    fn deliver(
        &self,
        pattern: &str,
        message: Message,
    ) {
        let subs = self.subscriptions.lock();
        for sub in subs.values().filter(|s| s.pattern == pattern) {
            (sub.handler)(message.clone());
        }
    }
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                subscriptions: Mutex::new(HashMap::new()),
                pending_acks: Mutex::new(VecDeque::new()),
                state_tx,
            }),
            connection: tokio::sync::Mutex::new(None),
            request_lock: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    async fn outbound(&self) -> PingPongResult<mpsc::Sender<ClientFrame>> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|c| c.outbound.clone())
            .ok_or_else(|| TransportError::NotConnected.into())
    }

    /// Отправляет `subscribe`/`unsubscribe` и ждёт подтверждения брокера.
    async fn request_ack(
        &self,
        outbound: &mpsc::Sender<ClientFrame>,
        frame: ClientFrame,
    ) -> Result<(), String> {
        let (tx, rx) = oneshot::channel();
        {
            let _guard = self.request_lock.lock().await;
            self.shared.pending_acks.lock().push_back(tx);
            if outbound.send(frame).await.is_err() {
                self.shared.pending_acks.lock().pop_back();
                return Err("connection closed".to_string());
            }
        }
        match timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("connection closed".to_string()),
            Err(_) => Err(format!(
                "no acknowledgement within {}ms",
                self.config.ack_timeout.as_millis()
            )),
        }
    }

    async fn close_connection(connection: Connection) {
        let Connection {
            outbound,
            reader,
            mut writer,
        } = connection;
        // Закрытие очереди завершает задачу записи.
        drop(outbound);
        if timeout(WRITER_CLOSE_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
        reader.abort();
        let _ = reader.await;
    }

    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<ClientFrame>,
        keepalive: Option<Duration>,
    ) {
        let mut ticker = keepalive.map(|period| interval_at(Instant::now() + period, period));
        loop {
            let frame = select! {
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = tick(&mut ticker) => ClientFrame::Ping,
            };
            let bytes = match encode_frame(&frame) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(op = frame.op(), error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(&bytes).await {
                warn!(error = %e, "Write to broker failed");
                break;
            }
        }
        if let Err(e) = writer.shutdown().await {
            trace!(error = %e, "Error during writer shutdown");
        }
    }

    async fn read_loop(
        reader: OwnedReadHalf,
        shared: Arc<Shared>,
    ) {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            match read_frame_line(&mut reader, &mut buf, MAX_SERVER_FRAME_LEN).await {
                Ok(Some(line)) => match decode_frame::<ServerFrame>(&line) {
                    Ok(ServerFrame::Message {
                        pattern,
                        topic,
                        payload,
                    }) => {
                        shared.deliver(&pattern, Message::new(topic, payload.into_bytes()));
                    }
                    Ok(ServerFrame::Ack { request, pattern }) => {
                        trace!(%request, ?pattern, "Broker acknowledged");
                        shared.resolve_ack(Ok(()));
                    }
                    Ok(ServerFrame::Error {
                        request: Some(request),
                        reason,
                    }) if request == "subscribe" || request == "unsubscribe" => {
                        shared.resolve_ack(Err(reason));
                    }
                    Ok(ServerFrame::Error { request, reason }) => {
                        warn!(?request, %reason, "Broker reported an error");
                    }
                    Ok(ServerFrame::Pong) => trace!("Keepalive pong"),
                    Err(e) => warn!(error = %e, "Discarding malformed frame from broker"),
                },
                Ok(None) => {
                    debug!("Broker closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Read from broker failed");
                    break;
                }
            }
        }
        shared.set_state(ConnectionState::Disconnected);
        shared.fail_pending("connection closed");
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> PingPongResult<()> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = slot.take() {
            Self::close_connection(stale).await;
        }

        let address = self.config.address.clone();
        self.shared.set_state(ConnectionState::Connecting);
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(&address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(TransportError::ConnectionFailed {
                    address,
                    reason: e.to_string(),
                }
                .into());
            }
            Err(_) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(TransportError::ConnectionTimeout { address }.into());
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let writer = tokio::spawn(Self::write_loop(
            write_half,
            outbound_rx,
            self.config.keepalive,
        ));
        let reader = tokio::spawn(Self::read_loop(read_half, self.shared.clone()));
        self.shared.set_state(ConnectionState::Connected);

        // Восстанавливаем подписки брокера после переподключения.
        let patterns: BTreeSet<String> = self
            .shared
            .subscriptions
            .lock()
            .values()
            .map(|s| s.pattern.clone())
            .collect();
        for pattern in patterns {
            let frame = ClientFrame::Subscribe {
                pattern: pattern.clone(),
            };
            if let Err(reason) = self.request_ack(&outbound, frame).await {
                self.shared.set_state(ConnectionState::Disconnected);
                Self::close_connection(Connection {
                    outbound,
                    reader,
                    writer,
                })
                .await;
                return Err(TransportError::SubscribeFailed { pattern, reason }.into());
            }
        }

        *slot = Some(Connection {
            outbound,
            reader,
            writer,
        });
        info!(%address, "Connected to broker");
        Ok(())
    }

    async fn disconnect(&self) -> PingPongResult<()> {
        let connection = self.connection.lock().await.take();
        self.shared.set_state(ConnectionState::Disconnected);
        if let Some(connection) = connection {
            Self::close_connection(connection).await;
            self.shared.fail_pending("disconnected");
            info!(address = %self.config.address, "Disconnected from broker");
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> PingPongResult<()> {
        let payload = String::from_utf8(payload.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
        let outbound = self.outbound().await?;
        let frame = ClientFrame::Publish {
            topic: topic.to_string(),
            payload,
        };
        match timeout(self.config.publish_timeout, outbound.send(frame)).await {
            Ok(Ok(())) => {
                trace!(%topic, "Publish queued");
                Ok(())
            }
            Ok(Err(_)) => Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "connection closed".to_string(),
            }
            .into()),
            Err(_) => Err(TransportError::PublishTimeout {
                topic: topic.to_string(),
                timeout_ms: self.config.publish_timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> PingPongResult<SubscriptionId> {
        if is_pattern(pattern) {
            Glob::new(pattern).map_err(|e| TransportError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        }
        let outbound = self.outbound().await?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Регистрируем обработчик до запроса, чтобы не потерять сообщения,
        // пришедшие сразу за подтверждением.
        let first_for_pattern = {
            let mut subs = self.shared.subscriptions.lock();
            let first = !subs.values().any(|s| s.pattern == pattern);
            subs.insert(
                id,
                TcpSubscription {
                    pattern: pattern.to_string(),
                    handler,
                },
            );
            first
        };

        if first_for_pattern {
            let frame = ClientFrame::Subscribe {
                pattern: pattern.to_string(),
            };
            if let Err(reason) = self.request_ack(&outbound, frame).await {
                self.shared.subscriptions.lock().remove(&id);
                return Err(TransportError::SubscribeFailed {
                    pattern: pattern.to_string(),
                    reason,
                }
                .into());
            }
        }
        debug!(%pattern, %id, "Subscribed via broker");
        Ok(id)
    }

    async fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> PingPongResult<()> {
        let pattern = {
            let mut subs = self.shared.subscriptions.lock();
            match subs.remove(&id) {
                Some(removed) if !subs.values().any(|s| s.pattern == removed.pattern) => {
                    Some(removed.pattern)
                }
                _ => None,
            }
        };
        let Some(pattern) = pattern else {
            return Ok(());
        };
        // Без подключения на брокере уже нет подписки.
        let Ok(outbound) = self.outbound().await else {
            return Ok(());
        };
        let frame = ClientFrame::Unsubscribe {
            pattern: pattern.clone(),
        };
        if let Err(reason) = self.request_ack(&outbound, frame).await {
            warn!(%pattern, %reason, "Broker did not confirm unsubscribe");
        }
        debug!(%pattern, %id, "Unsubscribed via broker");
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            connection.reader.abort();
            connection.writer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use pingpong_error::StatusCode;
    use tokio::{io::AsyncBufReadExt, net::TcpListener};

    use super::*;

    /// Тест проверяет ошибку подключения к закрытому порту и возврат
    /// состояния в `Disconnected`.
    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new(TcpTransportConfig {
            address,
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        });
        let err = transport.connect().await.unwrap_err();
        assert!(err.status_code().is_transport_error());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_without_connection() {
        let transport = TcpTransport::new(TcpTransportConfig::default());
        let err = transport
            .publish("ping/command", Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NotConnected);
    }

    /// Тест проверяет, что отправляемые кадры соответствуют формату
    /// брокера и что закрытие соединения сервером меняет состояние.
    #[tokio::test]
    async fn test_frames_on_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let _ = write.shutdown().await;
            line
        });

        let transport = TcpTransport::new(TcpTransportConfig {
            address,
            keepalive: None,
            ..Default::default()
        });
        transport.connect().await.unwrap();
        let mut state = transport.watch_state();
        transport
            .publish("ping/command", Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();

        let line = server.await.unwrap();
        assert_eq!(
            decode_frame::<ClientFrame>(&line).unwrap(),
            ClientFrame::Publish {
                topic: "ping/command".into(),
                payload: "{\"a\":1}".into(),
            }
        );

        timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!transport.is_connected());
    }

    /// Тест проверяет, что бесконечная строка от брокера обрывает
    /// соединение, а не копится в памяти.
    #[tokio::test]
    async fn test_oversized_broker_line_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let chunk = vec![b'x'; 64 * 1024];
            for _ in 0..(MAX_SERVER_FRAME_LEN / chunk.len() + 2) {
                if socket.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let transport = TcpTransport::new(TcpTransportConfig {
            address,
            keepalive: None,
            ..Default::default()
        });
        transport.connect().await.unwrap();
        let mut state = transport.watch_state();

        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
        server.abort();
    }
}
