use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Сигнал остановки, общий для сервера, соединений и фоновых задач.
///
/// В отличие от голого `Notify`, сработавший сигнал запоминается:
/// `wait()`, вызванный после `trigger()`, завершается сразу.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Ждёт срабатывания сигнала.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Регистрируемся до проверки флага, чтобы не пропустить
            // `notify_waiters` между проверкой и ожиданием.
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_wait_after_trigger_returns() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        timeout(Duration::from_millis(50), signal.wait())
            .await
            .expect("wait must complete after trigger");
    }

    #[tokio::test]
    async fn test_trigger_wakes_all_waiters() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let s = signal.clone();
                tokio::spawn(async move { s.wait().await })
            })
            .collect();
        tokio::task::yield_now().await;
        signal.trigger();
        for w in waiters {
            timeout(Duration::from_secs(1), w).await.unwrap().unwrap();
        }
        assert!(signal.is_triggered());
    }
}
