use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpStream},
    select,
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{sleep_until, timeout, Instant},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    frame::{decode_frame, encode_frame, read_frame_line, ClientFrame, ServerFrame, MAX_FRAME_LEN},
    ShutdownSignal,
};
use crate::{pubsub::is_pattern, AnySubscription, Broker, FrameError, RecvError};

/// Конфигурация для обработки соединений
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Максимальное кол-во одновременных соединений
    pub max_connections: usize,
    /// Таймаут простоя соединения (idle timeout)
    pub idle_timeout: Duration,
    /// Таймаут записи кадра
    pub write_timeout: Duration,
    /// Ёмкость очереди исходящих кадров одного соединения
    pub outbound_capacity: usize,
    /// Размер буфера для чтения
    pub read_buffer_size: usize,
}

/// Менеджер соединений с лимитом и graceful shutdown
#[derive(Debug)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    connection_semaphore: Arc<Semaphore>,
    /// Общий счётчик активных соединений
    active_connections: Arc<AtomicUsize>,
    shutdown_signal: Arc<ShutdownSignal>,
    /// Счётчик для генерации ID соединений
    connection_counter: AtomicU32,
}

/// Обработчик отдельного соединения
pub struct ConnectionHandler {
    connection_id: u32,
    socket: TcpStream,
    addr: SocketAddr,
    broker: Arc<Broker>,
    config: ConnectionConfig,
    shutdown_signal: Arc<ShutdownSignal>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        shutdown_signal: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_signal,
            connection_counter: AtomicU32::new(0),
        }
    }

    /// Текущее кол-во активных соединений
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Инициализация graceful shutdown
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown for connection manager");
        self.shutdown_signal.trigger();
    }

    /// Ждать завершения всех активных соединений
    pub async fn wait_for_shutdown(
        &self,
        timeout_duration: Duration,
    ) -> Result<()> {
        let start = Instant::now();

        while self.active_connections() > 0 {
            if start.elapsed() > timeout_duration {
                warn!(
                    "Shutdown timeout reached with {} active connections",
                    self.active_connections()
                );
                return Err(anyhow!("Shutdown timeout exceeded"));
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("All connections closed gracefully");
        Ok(())
    }

    /// Обрабатывает новое соединение
    pub async fn handle_connection(
        &self,
        mut socket: TcpStream,
        addr: SocketAddr,
        broker: Arc<Broker>,
    ) -> Result<()> {
        let _permit: OwnedSemaphorePermit =
            match self.connection_semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Rejecting connection from {}: limit reached", addr);
                    let frame = ServerFrame::Error {
                        request: None,
                        reason: "Maximum connections limit reached".to_string(),
                    };
                    if let Ok(bytes) = encode_frame(&frame) {
                        let _ = timeout(self.config.write_timeout, socket.write_all(&bytes)).await;
                    }
                    return Err(anyhow!("Maximum connections limit reached"));
                }
            };

        let connection_count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        let connection_id = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            "Connection {} established from {} (active: {})",
            connection_id, addr, connection_count
        );

        let handler = ConnectionHandler::new(
            connection_id,
            socket,
            addr,
            broker,
            self.config.clone(),
            self.shutdown_signal.clone(),
        );

        let result = handler.run().await;

        let remaining_connections = self.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;

        match &result {
            Ok(_) => debug!(
                "Connection {} from {} closed gracefully (remaining: {})",
                connection_id, addr, remaining_connections
            ),
            Err(e) => error!(
                "Connection {} from {} closed with error: {} (remaining: {})",
                connection_id, addr, e, remaining_connections
            ),
        }

        result
    }
}

impl ConnectionHandler {
    pub fn new(
        connection_id: u32,
        socket: TcpStream,
        addr: SocketAddr,
        broker: Arc<Broker>,
        config: ConnectionConfig,
        shutdown_signal: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            connection_id,
            socket,
            addr,
            broker,
            config,
            shutdown_signal,
        }
    }

    /// Основной цикл обработки соединения.
    pub async fn run(self) -> Result<()> {
        let ConnectionHandler {
            connection_id,
            socket,
            addr,
            broker,
            config,
            shutdown_signal,
        } = self;

        let (read_half, mut writer) = socket.into_split();
        let mut reader = BufReader::with_capacity(config.read_buffer_size, read_half);
        let mut line_buf = Vec::new();
        let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(config.outbound_capacity);
        let mut forwards: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut last_activity = Instant::now();

        let result = loop {
            select! {
                _ = shutdown_signal.wait() => {
                    info!("Connection {} ({}): Received shutdown signal", connection_id, addr);
                    let frame = ServerFrame::Error {
                        request: None,
                        reason: "Broker shutting down".to_string(),
                    };
                    let _ = Self::send_frame(&mut writer, &frame, config.write_timeout).await;
                    break Ok(());
                }

                _ = sleep_until(last_activity + config.idle_timeout) => {
                    warn!("Connection {} ({}): Idle timeout", connection_id, addr);
                    let frame = ServerFrame::Error {
                        request: None,
                        reason: "Connection idle timeout".to_string(),
                    };
                    let _ = Self::send_frame(&mut writer, &frame, config.write_timeout).await;
                    break Ok(());
                }

                Some(frame) = out_rx.recv() => {
                    if let Err(e) = Self::send_frame(&mut writer, &frame, config.write_timeout).await {
                        error!("Connection {} ({}): Failed to forward message: {}", connection_id, addr, e);
                        break Err(e);
                    }
                }

                line_result = read_frame_line(&mut reader, &mut line_buf, MAX_FRAME_LEN) => {
                    match line_result {
                        Ok(Some(line)) => {
                            last_activity = Instant::now();
                            trace!("Connection {} ({}): Received frame: {}", connection_id, addr, line.trim());

                            let reply = Self::process_frame(&broker, &line, &mut forwards, &out_tx);
                            if let Some(reply) = reply {
                                if let Err(e) = Self::send_frame(&mut writer, &reply, config.write_timeout).await {
                                    error!("Connection {} ({}): Failed to send reply: {}", connection_id, addr, e);
                                    break Err(e);
                                }
                            }
                        }
                        Ok(None) => {
                            debug!("Connection {} ({}): Client closed connection", connection_id, addr);
                            break Ok(());
                        }
                        Err(FrameError::InvalidUtf8) => {
                            warn!("Connection {} ({}): Ignoring invalid UTF-8 from client", connection_id, addr);
                            let frame = ServerFrame::Error {
                                request: None,
                                reason: "Frame is not valid UTF-8".to_string(),
                            };
                            let _ = Self::send_frame(&mut writer, &frame, config.write_timeout).await;
                        }
                        Err(e @ FrameError::TooLarge { .. }) => {
                            warn!("Connection {} ({}): {}, closing", connection_id, addr, e);
                            let frame = ServerFrame::Error {
                                request: None,
                                reason: e.to_string(),
                            };
                            let _ = Self::send_frame(&mut writer, &frame, config.write_timeout).await;
                            break Ok(());
                        }
                        Err(FrameError::Io(e)) if Self::is_recoverable_error(&e) => {
                            debug!("Connection {} ({}): Recoverable error: {}", connection_id, addr, e);
                            break Ok(());
                        }
                        Err(e) => {
                            error!("Connection {} ({}): Fatal read error: {}", connection_id, addr, e);
                            break Err(e.into());
                        }
                    }
                }
            }
        };

        for (_, task) in forwards.drain() {
            task.abort();
        }
        Self::graceful_close_writer(connection_id, writer).await;
        result
    }

    /// Обрабатывает один кадр клиента. Возвращает ответный кадр, если он
    /// нужен.
    fn process_frame(
        broker: &Arc<Broker>,
        line: &str,
        forwards: &mut HashMap<String, JoinHandle<()>>,
        out_tx: &mpsc::Sender<ServerFrame>,
    ) -> Option<ServerFrame> {
        let frame = match decode_frame::<ClientFrame>(line) {
            Ok(frame) => frame,
            Err(e) => {
                return Some(ServerFrame::Error {
                    request: None,
                    reason: e.to_string(),
                })
            }
        };

        match frame {
            ClientFrame::Subscribe { pattern } => {
                if !forwards.contains_key(&pattern) {
                    let sub = if is_pattern(&pattern) {
                        match broker.psubscribe(&pattern) {
                            Ok(psub) => AnySubscription::Pattern(psub),
                            Err(e) => {
                                return Some(ServerFrame::Error {
                                    request: Some("subscribe".to_string()),
                                    reason: format!("invalid pattern '{pattern}': {e}"),
                                })
                            }
                        }
                    } else {
                        AnySubscription::Exact(broker.subscribe(&pattern))
                    };
                    let task = Self::spawn_forward(pattern.clone(), sub, out_tx.clone());
                    forwards.insert(pattern.clone(), task);
                }
                Some(ServerFrame::Ack {
                    request: "subscribe".to_string(),
                    pattern: Some(pattern),
                })
            }
            ClientFrame::Unsubscribe { pattern } => {
                if let Some(task) = forwards.remove(&pattern) {
                    task.abort();
                }
                Some(ServerFrame::Ack {
                    request: "unsubscribe".to_string(),
                    pattern: Some(pattern),
                })
            }
            ClientFrame::Publish { topic, payload } => {
                if topic.is_empty() || is_pattern(&topic) {
                    return Some(ServerFrame::Error {
                        request: Some("publish".to_string()),
                        reason: format!("invalid topic '{topic}'"),
                    });
                }
                let delivered = broker.publish(&topic, Bytes::from(payload));
                trace!(%topic, delivered, "Broker publish");
                None
            }
            ClientFrame::Ping => Some(ServerFrame::Pong),
        }
    }

    /// Пересылает сообщения подписки брокера в очередь соединения.
    fn spawn_forward(
        pattern: String,
        mut sub: AnySubscription,
        out_tx: mpsc::Sender<ServerFrame>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Ok(message) => {
                        let frame = ServerFrame::Message {
                            pattern: pattern.clone(),
                            topic: message.topic.to_string(),
                            payload: String::from_utf8_lossy(&message.payload).into_owned(),
                        };
                        if out_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(%pattern, skipped = n, "Connection lagged, messages skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Отправляет кадр с таймаутом
    async fn send_frame(
        writer: &mut OwnedWriteHalf,
        frame: &ServerFrame,
        write_timeout: Duration,
    ) -> Result<()> {
        let bytes = encode_frame(frame).context("Failed to encode frame")?;
        timeout(write_timeout, writer.write_all(&bytes))
            .await
            .context("Write timeout")?
            .context("Failed to write frame")?;

        Ok(())
    }

    /// Проверяет, является ли ошибка восстанавливаемой
    fn is_recoverable_error(error: &std::io::Error) -> bool {
        matches!(
            error.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut
        )
    }

    /// Graceful закрытие соединения
    async fn graceful_close_writer(
        connection_id: u32,
        mut writer: OwnedWriteHalf,
    ) {
        if let Err(e) = writer.shutdown().await {
            // Игнорируем ошибки при закрытии уже закрытого соединения
            if e.kind() != ErrorKind::NotConnected {
                debug!("Connection {}: Error during shutdown: {}", connection_id, e);
            }
        }
        debug!("Connection {} closed gracefully", connection_id);
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            idle_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            outbound_capacity: 1024,
            read_buffer_size: 8192,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    async fn start_handler(
        config: ConnectionConfig,
    ) -> (
        TcpStream,
        Arc<Broker>,
        Arc<ShutdownSignal>,
        JoinHandle<Result<()>>,
    ) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let broker = Arc::new(Broker::default());
        let shutdown = Arc::new(ShutdownSignal::new());

        let (b, s) = (broker.clone(), shutdown.clone());
        let server = tokio::spawn(async move {
            let (socket, addr) = listener.accept().await?;
            ConnectionHandler::new(1, socket, addr, b, config, s)
                .run()
                .await
        });
        let client = TcpStream::connect(local_addr).await.unwrap();
        (client, broker, shutdown, server)
    }

    async fn read_frame(lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>) -> ServerFrame {
        let line = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("timed out")
            .unwrap()
            .expect("connection closed");
        decode_frame(&line).unwrap()
    }

    /// Тест проверяет ping, подписку и пересылку опубликованного
    /// сообщения.
    #[tokio::test]
    async fn test_ping_subscribe_and_forward() {
        let (client, broker, _shutdown, _server) = start_handler(ConnectionConfig::default()).await;
        let (read, mut write) = client.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"{\"op\":\"ping\"}\n").await.unwrap();
        assert_eq!(read_frame(&mut lines).await, ServerFrame::Pong);

        write
            .write_all(b"{\"op\":\"subscribe\",\"pattern\":\"pong/*/response\"}\n")
            .await
            .unwrap();
        assert_eq!(
            read_frame(&mut lines).await,
            ServerFrame::Ack {
                request: "subscribe".into(),
                pattern: Some("pong/*/response".into()),
            }
        );

        broker.publish("pong/s1/response", Bytes::from_static(b"{\"ok\":true}"));
        assert_eq!(
            read_frame(&mut lines).await,
            ServerFrame::Message {
                pattern: "pong/*/response".into(),
                topic: "pong/s1/response".into(),
                payload: "{\"ok\":true}".into(),
            }
        );
    }

    /// Тест проверяет, что невалидный кадр даёт `error`, а соединение
    /// продолжает работать.
    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let (client, _broker, _shutdown, _server) = start_handler(ConnectionConfig::default()).await;
        let (read, mut write) = client.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"hello\n").await.unwrap();
        assert!(matches!(
            read_frame(&mut lines).await,
            ServerFrame::Error { request: None, .. }
        ));

        write.write_all(b"{\"op\":\"ping\"}\n").await.unwrap();
        assert_eq!(read_frame(&mut lines).await, ServerFrame::Pong);
    }

    #[tokio::test]
    async fn test_publish_to_pattern_rejected() {
        let (client, _broker, _shutdown, _server) = start_handler(ConnectionConfig::default()).await;
        let (read, mut write) = client.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"op\":\"publish\",\"topic\":\"pong/*\",\"payload\":\"{}\"}\n")
            .await
            .unwrap();
        assert!(matches!(
            read_frame(&mut lines).await,
            ServerFrame::Error { request: Some(r), .. } if r == "publish"
        ));
    }

    /// Тест проверяет, что строка без перевода строки длиннее лимита
    /// закрывает соединение с кадром `error`.
    #[tokio::test]
    async fn test_oversized_line_closes_connection() {
        let (client, _broker, _shutdown, server) = start_handler(ConnectionConfig::default()).await;
        let (read, mut write) = client.into_split();
        let mut lines = BufReader::new(read).lines();

        let junk = vec![b'a'; MAX_FRAME_LEN + 1];
        write.write_all(&junk).await.unwrap();

        match read_frame(&mut lines).await {
            ServerFrame::Error { reason, .. } => assert!(reason.contains("exceeds")),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .is_ok());
    }

    /// Тест проверяет, что отписка и закрытие соединения освобождают
    /// темы брокера.
    #[tokio::test]
    async fn test_unsubscribe_and_disconnect_release_topics() {
        let (client, broker, _shutdown, server) = start_handler(ConnectionConfig::default()).await;
        let (read, mut write) = client.into_split();
        let mut lines = BufReader::new(read).lines();

        for frame in [
            "{\"op\":\"subscribe\",\"pattern\":\"pong/s1/response\"}\n",
            "{\"op\":\"subscribe\",\"pattern\":\"pong/s2/response\"}\n",
            "{\"op\":\"unsubscribe\",\"pattern\":\"pong/s1/response\"}\n",
        ] {
            write.write_all(frame.as_bytes()).await.unwrap();
            assert!(matches!(read_frame(&mut lines).await, ServerFrame::Ack { .. }));
        }
        wait_for_topics(&broker, 1).await;

        drop(write);
        timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        wait_for_topics(&broker, 0).await;
    }

    async fn wait_for_topics(
        broker: &Broker,
        expected: usize,
    ) {
        timeout(Duration::from_secs(2), async {
            while broker.topic_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("topics were not released");
    }

    /// Тест проверяет закрытие соединения по сигналу остановки.
    #[tokio::test]
    async fn test_shutdown_closes_connection() {
        let (client, _broker, shutdown, server) = start_handler(ConnectionConfig::default()).await;
        let (read, _write) = client.into_split();
        let mut lines = BufReader::new(read).lines();

        tokio::task::yield_now().await;
        shutdown.trigger();
        assert!(matches!(
            read_frame(&mut lines).await,
            ServerFrame::Error { .. }
        ));
        timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let config = ConnectionConfig {
            idle_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let (client, _broker, _shutdown, server) = start_handler(config).await;
        let (read, _write) = client.into_split();
        let mut lines = BufReader::new(read).lines();

        match read_frame(&mut lines).await {
            ServerFrame::Error { reason, .. } => assert!(reason.contains("idle")),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(server.await.unwrap().is_ok());
    }
}
