use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use pingpong_error::StreamingError;
use tokio::{
    select,
    sync::oneshot,
    task::JoinHandle,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{encode_command, Command, CommandType, Payload, COMMAND_TOPIC},
    session::SessionChannel,
    transport::Transport,
};

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Интервал по умолчанию для [`StreamingController::start_default`]
    pub interval: Duration,
    /// Сколько `stop()` ждёт штатного выхода цикла до abort
    pub stop_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Цикл уже запущен, вызов ничего не изменил
    AlreadyRunning,
}

struct RunningLoop {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Счётчики цикла, общие с задачей.
#[derive(Default)]
struct LoopCounters {
    published: AtomicU64,
    failures: AtomicU64,
}

/// Цикл периодической публикации `TemperatureRead`.
///
/// Состояния `Idle -> Running -> Idle`. После возврата из
/// [`stop`](Self::stop) публикаций больше нет.
pub struct StreamingController {
    transport: Arc<dyn Transport>,
    session_id: Arc<str>,
    config: StreamingConfig,
    running: Mutex<Option<RunningLoop>>,
    counters: Arc<LoopCounters>,
}

impl StreamingController {
    pub fn new(
        transport: Arc<dyn Transport>,
        session_id: impl Into<Arc<str>>,
        config: StreamingConfig,
    ) -> Self {
        Self {
            transport,
            session_id: session_id.into(),
            config,
            running: Mutex::new(None),
            counters: Arc::new(LoopCounters::default()),
        }
    }

    /// Контроллер, публикующий от имени сессии: ответы попадут в её буфер.
    pub fn for_session(
        session: &SessionChannel,
        config: StreamingConfig,
    ) -> Self {
        Self::new(session.transport().clone(), session.session_id(), config)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Успешные публикации за всё время жизни контроллера.
    pub fn published(&self) -> u64 {
        self.counters.published.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.counters.failures.load(Ordering::Relaxed)
    }

    /// Запуск с интервалом из конфигурации.
    pub fn start_default(&self) -> Result<StartOutcome, StreamingError> {
        self.start(self.config.interval)
    }

    /// Запускает цикл. Первая публикация происходит сразу.
    pub fn start(
        &self,
        period: Duration,
    ) -> Result<StartOutcome, StreamingError> {
        if period.is_zero() {
            return Err(StreamingError::InvalidInterval);
        }

        let mut running = self.running.lock();
        if running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
        {
            debug!(session_id = %self.session_id, "Streaming already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            self.transport.clone(),
            self.session_id.clone(),
            period,
            self.config.publish_timeout,
            self.counters.clone(),
            stop_rx,
        ));
        *running = Some(RunningLoop { stop_tx, task });

        info!(
            session_id = %self.session_id,
            interval_ms = period.as_millis() as u64,
            "Streaming started"
        );
        Ok(StartOutcome::Started)
    }

    /// Останавливает цикл и ждёт его завершения не дольше `stop_timeout`,
    /// затем прерывает задачу. Возвращает `false`, если цикл не был
    /// запущен.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().take();
        let Some(RunningLoop { stop_tx, mut task }) = running else {
            return false;
        };

        let _ = stop_tx.send(());
        match timeout(self.config.stop_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id = %self.session_id, error = %e, "Streaming task failed"),
            Err(_) => {
                warn!(
                    session_id = %self.session_id,
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "Streaming loop did not stop in time, aborting"
                );
                task.abort();
                let _ = task.await;
            }
        }

        info!(
            session_id = %self.session_id,
            published = self.published(),
            "Streaming stopped"
        );
        true
    }
}

impl Drop for StreamingController {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.task.abort();
        }
    }
}

async fn run_loop(
    transport: Arc<dyn Transport>,
    session_id: Arc<str>,
    period: Duration,
    publish_timeout: Duration,
    counters: Arc<LoopCounters>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            biased;
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {}
        }

        let command = Command::new(CommandType::TemperatureRead, Payload::new(), &*session_id);
        let payload = match encode_command(&command) {
            Ok(payload) => payload,
            Err(e) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(%session_id, error = %e, "Failed to encode streaming command");
                continue;
            }
        };

        select! {
            biased;
            _ = &mut stop_rx => break,
            res = timeout(publish_timeout, transport.publish(COMMAND_TOPIC, payload)) => match res {
                Ok(Ok(())) => {
                    counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%session_id, error = %e, "Streaming publish failed");
                }
                Err(_) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        %session_id,
                        timeout_ms = publish_timeout.as_millis() as u64,
                        "Streaming publish timed out"
                    );
                }
            }
        }
    }
    debug!(%session_id, "Streaming loop exited");
}
