use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use pingpong_error::{PingPongResult, ProtocolError, ResultExt, SessionError};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{OverflowPolicy, PushOutcome, ResponseBuffer};
use crate::{
    protocol::{
        decode_response, encode_command, response_topic, validate_session_id, Command,
        CommandType, Payload, Response, COMMAND_TOPIC,
    },
    transport::{MessageHandler, SubscriptionId, Transport},
    Message,
};

/// Параметры сессии коммандера.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Таймаут по умолчанию для запросов с ожиданием ответа
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Новый идентификатор сессии вида `ping_<uuid>`.
pub fn generate_session_id() -> String {
    format!("ping_{}", Uuid::new_v4().simple())
}

/// Состояние, разделяемое с обработчиком доставки.
struct Inbox {
    session_id: Arc<str>,
    buffer: ResponseBuffer,
    waiters: Mutex<HashMap<String, oneshot::Sender<Response>>>,
    malformed: AtomicU64,
}

impl Inbox {
    /// Разбирает входящее сообщение и отдаёт ответ ожидающему запросу
    /// или в буфер.
    fn deliver(
        &self,
        message: Message,
    ) {
        let response = match decode_response(&message.payload) {
            Ok(response) => response,
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %self.session_id,
                    topic = %message.topic,
                    error = %e,
                    "Discarding malformed response"
                );
                return;
            }
        };

        if response.session_id.as_str() != &*self.session_id {
            warn!(
                session_id = %self.session_id,
                foreign = %response.session_id,
                "Discarding response for another session"
            );
            return;
        }

        let response = match response.request_id.as_deref() {
            Some(request_id) => match self.waiters.lock().remove(request_id) {
                Some(waiter) => match waiter.send(response) {
                    Ok(()) => return,
                    // Запрос уже отменён, ответ уходит в буфер.
                    Err(response) => response,
                },
                None => response,
            },
            None => response,
        };

        trace!(
            session_id = %self.session_id,
            command_type = %response.command_type,
            "Buffering response"
        );
        match self.buffer.push(response) {
            Ok(PushOutcome::Stored) => {}
            Ok(outcome) => {
                debug!(session_id = %self.session_id, ?outcome, "Response buffer overflow")
            }
            Err(e) => warn!(session_id = %self.session_id, error = %e, "Response rejected"),
        }
    }
}

/// Сессия коммандера: публикует команды в общий топик и принимает ответы
/// из `pong/{session_id}/response`.
///
/// Подписка создаётся один раз в [`open`](Self::open) и снимается в
/// [`close`](Self::close).
pub struct SessionChannel {
    transport: Arc<dyn Transport>,
    inbox: Arc<Inbox>,
    config: SessionConfig,
    subscription: Mutex<Option<SubscriptionId>>,
    closed: AtomicBool,
}

impl SessionChannel {
    /// Открывает сессию. Без `session_id` генерируется новый.
    pub async fn open(
        transport: Arc<dyn Transport>,
        session_id: Option<String>,
        config: SessionConfig,
    ) -> PingPongResult<Self> {
        let session_id = session_id.unwrap_or_else(generate_session_id);
        validate_session_id(&session_id)?;
        let session_id: Arc<str> = session_id.into();

        let inbox = Arc::new(Inbox {
            session_id: session_id.clone(),
            buffer: ResponseBuffer::new(
                session_id.clone(),
                config.buffer_capacity,
                config.overflow_policy,
            ),
            waiters: Mutex::new(HashMap::new()),
            malformed: AtomicU64::new(0),
        });

        let handler: MessageHandler = {
            let inbox = inbox.clone();
            Arc::new(move |message| inbox.deliver(message))
        };
        let topic = response_topic(&session_id);
        let subscription = transport
            .subscribe(&topic, handler)
            .await
            .with_context(|| format!("opening session '{session_id}'"))?;
        debug!(%session_id, %topic, "Session opened");

        Ok(Self {
            transport,
            inbox,
            config,
            subscription: Mutex::new(Some(subscription)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inbox.session_id
    }

    pub fn response_topic(&self) -> String {
        response_topic(&self.inbox.session_id)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn buffer(&self) -> &ResponseBuffer {
        &self.inbox.buffer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Сколько входящих сообщений не удалось разобрать.
    pub fn malformed_count(&self) -> u64 {
        self.inbox.malformed.load(Ordering::Relaxed)
    }

    /// Запросы, ожидающие ответа.
    pub fn pending_requests(&self) -> usize {
        self.inbox.waiters.lock().len()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed {
                session_id: self.session_id().to_string(),
            });
        }
        Ok(())
    }

    /// Публикует команду этой сессии. Ответ попадёт в буфер.
    pub async fn send(
        &self,
        command_type: CommandType,
        data: Payload,
    ) -> PingPongResult<Command> {
        let command = Command::new(command_type, data, self.session_id());
        self.publish(&command).await?;
        Ok(command)
    }

    /// Публикует готовую команду. `session_id` команды должен совпадать
    /// с сессией, иначе ответ уйдёт чужому подписчику.
    pub async fn publish(
        &self,
        command: &Command,
    ) -> PingPongResult<()> {
        self.ensure_open()?;
        if command.session_id != self.session_id() {
            return Err(ProtocolError::InvalidSessionId {
                session_id: command.session_id.clone(),
                reason: format!("command does not belong to session '{}'", self.session_id()),
            }
            .into());
        }
        let payload = encode_command(command)?;
        self.transport.publish(COMMAND_TOPIC, payload).await?;
        trace!(
            session_id = %command.session_id,
            command_type = %command.command_type,
            "Command published"
        );
        Ok(())
    }

    /// Публикует команду с новым `request_id` и ждёт соответствующий ответ.
    pub async fn request(
        &self,
        command_type: CommandType,
        data: Payload,
        timeout: Duration,
    ) -> PingPongResult<Response> {
        self.ensure_open()?;
        let request_id = Uuid::new_v4().to_string();
        let command =
            Command::new(command_type, data, self.session_id()).with_request_id(&request_id);

        let (tx, rx) = oneshot::channel();
        self.inbox.waiters.lock().insert(request_id.clone(), tx);

        if let Err(e) = self.publish(&command).await {
            self.inbox.waiters.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Отправитель удалён в close().
            Ok(Err(_)) => Err(SessionError::Closed {
                session_id: self.session_id().to_string(),
            }
            .into()),
            Err(_) => {
                self.inbox.waiters.lock().remove(&request_id);
                warn!(
                    session_id = %self.session_id(),
                    %request_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(SessionError::RequestTimeout {
                    session_id: self.session_id().to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }

    /// [`request`](Self::request) с таймаутом из конфигурации.
    pub async fn request_default(
        &self,
        command_type: CommandType,
        data: Payload,
    ) -> PingPongResult<Response> {
        self.request(command_type, data, self.config.request_timeout)
            .await
    }

    /// Все накопленные ответы, от старых к новым.
    pub fn drain(&self) -> Vec<Response> {
        self.inbox.buffer.drain()
    }

    /// Следующий ответ из буфера. `None` после закрытия и опустошения.
    pub async fn recv(&self) -> Option<Response> {
        self.inbox.buffer.recv().await
    }

    /// Закрывает сессию: снимает подписку, закрывает буфер и завершает
    /// ожидающие запросы ошибкой `Closed`. Повторный вызов ничего не
    /// делает.
    pub async fn close(&self) -> PingPongResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.inbox.buffer.close();
        let pending = {
            let mut waiters = self.inbox.waiters.lock();
            let n = waiters.len();
            waiters.clear();
            n
        };

        let subscription = self.subscription.lock().take();
        if let Some(id) = subscription {
            self.transport.unsubscribe(id).await?;
        }
        debug!(session_id = %self.session_id(), pending, "Session closed");
        Ok(())
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inbox.buffer.close();
        self.inbox.waiters.lock().clear();

        // Подписку снимаем в фоне, если есть рантайм.
        if let Some(id) = self.subscription.get_mut().take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let transport = self.transport.clone();
                handle.spawn(async move {
                    let _ = transport.unsubscribe(id).await;
                });
            }
        }
    }
}
