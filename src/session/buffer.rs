use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use pingpong_error::SessionError;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::protocol::Response;

/// Поведение буфера при заполнении.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Вытеснить самый старый ответ
    #[default]
    DropOldest,
    /// Отбросить пришедший ответ
    DropNewest,
    /// Отбросить пришедший ответ и вернуть ошибку
    Reject,
}

/// Результат успешного `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// Ответ сохранён, самый старый вытеснен
    DroppedOldest,
    /// Ответ не сохранён
    DroppedNewest,
}

struct Inner {
    queue: VecDeque<Response>,
    closed: bool,
}

/// Ограниченная FIFO-очередь входящих ответов одной сессии.
///
/// Пишет в неё задача доставки транспорта, читает потребитель через
/// [`drain`](Self::drain) или [`recv`](Self::recv).
pub struct ResponseBuffer {
    session_id: Arc<str>,
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<Inner>,
    notify: Notify,
    dropped: AtomicU64,
}

impl ResponseBuffer {
    /// `capacity` меньше единицы поднимается до единицы.
    pub fn new(
        session_id: impl Into<Arc<str>>,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            session_id: session_id.into(),
            capacity,
            policy,
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Сколько ответов отброшено из-за переполнения.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Кладёт ответ в конец очереди с учётом политики переполнения.
    pub fn push(
        &self,
        response: Response,
    ) -> Result<PushOutcome, SessionError> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(SessionError::Closed {
                    session_id: self.session_id.to_string(),
                });
            }

            if inner.queue.len() < self.capacity {
                inner.queue.push_back(response);
                PushOutcome::Stored
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        inner.queue.pop_front();
                        inner.queue.push_back(response);
                        PushOutcome::DroppedOldest
                    }
                    OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
                    OverflowPolicy::Reject => {
                        return Err(SessionError::BufferFull {
                            capacity: self.capacity,
                        })
                    }
                }
            }
        };

        if outcome != PushOutcome::DroppedNewest {
            self.notify.notify_one();
        }
        Ok(outcome)
    }

    pub fn try_pop(&self) -> Option<Response> {
        self.inner.lock().queue.pop_front()
    }

    /// Забирает все накопленные ответы, от старых к новым. Не ждёт.
    pub fn drain(&self) -> Vec<Response> {
        self.inner.lock().queue.drain(..).collect()
    }

    /// Ждёт следующий ответ.
    ///
    /// После `close()` отдаёт оставшиеся ответы, затем `None`.
    pub async fn recv(&self) -> Option<Response> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(response) = inner.queue.pop_front() {
                    return Some(response);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Закрывает буфер: новые ответы отклоняются, ожидающие `recv`
    /// просыпаются.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }
}
