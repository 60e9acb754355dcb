//! Респондер: принимает команды из `ping/command`, прогоняет их через
//! [`Dispatcher`] и публикует ответы в `pong/{session_id}/response`.
//!
//! Обработчик доставки только разбирает команду и кладёт её в
//! ограниченную очередь. Все изменения устройства выполняет одна
//! рабочая задача, поэтому команды обрабатываются строго по очереди.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use pingpong_error::{PingPongResult, ResultExt};
use serde::Serialize;
use tokio::{
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, trace, warn};

use crate::{
    dispatcher::Dispatcher,
    protocol::{
        decode_command, encode_response, response_topic, validate_session_id, Command,
        COMMAND_TOPIC,
    },
    transport::{MessageHandler, SubscriptionId, Transport},
    Message,
};

/// Сколько `stop()` ждёт завершения рабочей задачи.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Ёмкость очереди команд. При переполнении новая команда
    /// отбрасывается и учитывается в `dropped`.
    pub queue_capacity: usize,
    pub publish_timeout: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            publish_timeout: Duration::from_secs(2),
        }
    }
}

/// Снимок счётчиков респондера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponderStats {
    /// Все доставленные сообщения, включая некорректные
    pub received: u64,
    pub processed: u64,
    pub malformed: u64,
    /// Отброшены из-за переполнения очереди
    pub dropped: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    processed: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
    publish_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ResponderStats {
        ResponderStats {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Responder {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    counters: Arc<Counters>,
    subscription: Mutex<Option<SubscriptionId>>,
    worker: Mutex<Option<Worker>>,
}

impl Responder {
    /// Подписывается на топик команд и запускает рабочую задачу.
    pub async fn start(
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        config: ResponderConfig,
    ) -> PingPongResult<Self> {
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(run_worker(
            transport.clone(),
            dispatcher.clone(),
            counters.clone(),
            config.publish_timeout,
            rx,
            stop_rx,
        ));

        let handler: MessageHandler = {
            let counters = counters.clone();
            Arc::new(move |message| enqueue(&counters, &tx, message))
        };
        let subscription = match transport
            .subscribe(COMMAND_TOPIC, handler)
            .await
            .context("starting responder")
        {
            Ok(id) => id,
            Err(e) => {
                task.abort();
                return Err(e);
            }
        };

        info!(
            topic = COMMAND_TOPIC,
            queue_capacity = config.queue_capacity,
            "Responder started"
        );
        Ok(Self {
            transport,
            dispatcher,
            counters,
            subscription: Mutex::new(Some(subscription)),
            worker: Mutex::new(Some(Worker { stop_tx, task })),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn stats(&self) -> ResponderStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// Снимает подписку, даёт рабочей задаче обработать уже принятые
    /// команды и дожидается её завершения. Повторный вызов ничего не
    /// делает.
    pub async fn stop(&self) -> PingPongResult<()> {
        let subscription = self.subscription.lock().take();
        let unsubscribed = match subscription {
            Some(id) => self.transport.unsubscribe(id).await,
            None => Ok(()),
        };

        let worker = self.worker.lock().take();
        if let Some(Worker { stop_tx, mut task }) = worker {
            let _ = stop_tx.send(());
            if timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                warn!("Responder worker did not stop in time, aborting");
                task.abort();
                let _ = task.await;
            }
            info!(stats = ?self.stats(), "Responder stopped");
        }
        unsubscribed
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.task.abort();
        }
    }
}

/// Обработчик доставки: разбирает команду и ставит её в очередь.
fn enqueue(
    counters: &Counters,
    tx: &mpsc::Sender<Command>,
    message: Message,
) {
    counters.received.fetch_add(1, Ordering::Relaxed);

    let command = match decode_command(&message.payload) {
        Ok(command) => command,
        Err(e) => {
            counters.malformed.fetch_add(1, Ordering::Relaxed);
            warn!(topic = %message.topic, error = %e, "Discarding malformed command");
            return;
        }
    };
    if let Err(e) = validate_session_id(&command.session_id) {
        counters.malformed.fetch_add(1, Ordering::Relaxed);
        warn!(error = %e, "Discarding command with unusable session id");
        return;
    }

    if let Err(e) = tx.try_send(command) {
        counters.dropped.fetch_add(1, Ordering::Relaxed);
        let command = match e {
            mpsc::error::TrySendError::Full(c) | mpsc::error::TrySendError::Closed(c) => c,
        };
        warn!(
            session_id = %command.session_id,
            command_type = %command.command_type,
            "Command queue full, dropping command"
        );
    }
}

async fn run_worker(
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    counters: Arc<Counters>,
    publish_timeout: Duration,
    mut rx: mpsc::Receiver<Command>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        let command = select! {
            biased;
            _ = &mut stop_rx => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        handle_command(&*transport, &dispatcher, &counters, publish_timeout, command).await;
    }

    // Доделываем то, что уже было в очереди на момент остановки.
    rx.close();
    while let Some(command) = rx.recv().await {
        handle_command(&*transport, &dispatcher, &counters, publish_timeout, command).await;
    }
    debug!("Responder worker exited");
}

async fn handle_command(
    transport: &dyn Transport,
    dispatcher: &Dispatcher,
    counters: &Counters,
    publish_timeout: Duration,
    command: Command,
) {
    let response = dispatcher.dispatch(&command);
    counters.processed.fetch_add(1, Ordering::Relaxed);

    let payload = match encode_response(&response) {
        Ok(payload) => payload,
        Err(e) => {
            counters.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(session_id = %command.session_id, error = %e, "Failed to encode response");
            return;
        }
    };

    let topic = response_topic(&command.session_id);
    match timeout(publish_timeout, transport.publish(&topic, payload)).await {
        Ok(Ok(())) => trace!(
            session_id = %command.session_id,
            command_type = %command.command_type,
            %topic,
            "Response published"
        ),
        Ok(Err(e)) => {
            counters.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(session_id = %command.session_id, %topic, error = %e, "Response publish failed");
        }
        Err(_) => {
            counters.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                session_id = %command.session_id,
                %topic,
                timeout_ms = publish_timeout.as_millis() as u64,
                "Response publish timed out"
            );
        }
    }
}
