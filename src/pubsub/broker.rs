use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use bytes::Bytes;
use dashmap::DashMap;
use globset::{Glob, GlobMatcher};
use tokio::sync::broadcast;

use super::{Message, PatternSubscription, Subscription};

/// Точные темы → `Sender`.
pub(crate) type TopicTable = DashMap<Arc<str>, broadcast::Sender<Message>>;
/// Шаблоны тем → matcher + `Sender`.
pub(crate) type PatternTable = DashMap<String, PatternEntry>;

/// Подписка по шаблону: скомпилированный matcher и канал рассылки.
pub(crate) struct PatternEntry {
    matcher: GlobMatcher,
    pub(crate) tx: broadcast::Sender<Message>,
}

/// Брокер Pub/Sub сообщений.
///
/// Поддерживает:
/// - Точные подписки по имени темы
/// - Подписки по шаблонам (glob), например `pong/*/response`
/// - Удаление темы или шаблона при уходе последнего подписчика
/// - Статистику публикаций и ошибок отправки
///
/// Таблицы живут в `Arc`: подписка держит на свою таблицу слабую ссылку и
/// при `Drop` снимает запись, если других приёмников не осталось.
pub struct Broker {
    topics: Arc<TopicTable>,
    patterns: Arc<PatternTable>,
    /// Ёмкость буфера каждого `broadcast::channel`
    default_capacity: usize,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Количество неудачных `send` (подписчики ушли)
    pub send_error_count: AtomicUsize,
}

impl Broker {
    /// Создаёт новый `Broker` с заданной буферной ёмкостью.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            patterns: Arc::new(DashMap::new()),
            default_capacity: default_capacity.max(1),
            publish_count: AtomicUsize::new(0),
            send_error_count: AtomicUsize::new(0),
        }
    }

    /// Подписка на конкретную тему (точное совпадение).
    ///
    /// Приёмник создаётся под блокировкой записи, поэтому параллельный
    /// `Drop` последней подписки не может удалить тему из-под новой.
    pub fn subscribe(
        &self,
        topic: &str,
    ) -> Subscription {
        let entry = self
            .topics
            .entry(Arc::from(topic))
            .or_insert_with(|| broadcast::channel(self.default_capacity).0);
        let key = entry.key().clone();
        let inner = entry.value().subscribe();
        drop(entry);

        Subscription {
            topic: key,
            inner: Some(inner),
            table: Arc::downgrade(&self.topics),
        }
    }

    /// Подписка по шаблону (glob), например `"pong/*/response"`.
    ///
    /// Повторная подписка на тот же шаблон получит тот же `Sender`.
    pub fn psubscribe(
        &self,
        pattern: &str,
    ) -> Result<PatternSubscription, globset::Error> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        let entry = self
            .patterns
            .entry(pattern.to_string())
            .or_insert_with(|| PatternEntry {
                matcher,
                tx: broadcast::channel(self.default_capacity).0,
            });
        let inner = entry.tx.subscribe();
        drop(entry);

        Ok(PatternSubscription {
            pattern: pattern.to_string(),
            inner: Some(inner),
            table: Arc::downgrade(&self.patterns),
        })
    }

    /// Отписка от шаблона. Все подписчики шаблона получат `Closed`.
    pub fn punsubscribe(
        &self,
        pattern: &str,
    ) {
        self.patterns.remove(pattern);
    }

    /// Публикация сообщения в тему.
    ///
    /// Работает в два этапа:
    /// 1. Отправляет в точную тему (если есть)
    /// 2. Отправляет всем подписчикам, чей шаблон совпадает с темой
    ///
    /// Возвращает число получателей, которым сообщение было поставлено в
    /// очередь. Если в точной теме не осталось подписчиков, тема удаляется.
    pub fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;
        let mut topic_key: Option<Arc<str>> = None;

        // 1) точное совпадение
        if let Some(entry) = self.topics.get(topic) {
            let tx = entry.value().clone();
            let key = entry.key().clone();
            drop(entry);

            match tx.send(Message::new(key.clone(), payload.clone())) {
                Ok(n) => delivered += n,
                Err(_) => {
                    self.send_error_count.fetch_add(1, Ordering::Relaxed);
                    self.topics
                        .remove_if(&*key, |_, tx| tx.receiver_count() == 0);
                }
            }
            topic_key = Some(key);
        }

        // 2) по шаблону
        let mut stale = Vec::new();
        for entry in self.patterns.iter() {
            if entry.value().matcher.is_match(topic) {
                let key = topic_key.get_or_insert_with(|| Arc::from(topic)).clone();
                match entry.value().tx.send(Message::new(key, payload.clone())) {
                    Ok(n) => delivered += n,
                    Err(_) => stale.push(entry.key().clone()),
                }
            }
        }
        for pattern in stale {
            self.patterns
                .remove_if(&pattern, |_, entry| entry.tx.receiver_count() == 0);
        }

        delivered
    }

    /// Количество активных точных тем.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Количество активных шаблонов.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecvError;
    use tokio::time::{timeout, Duration};

    /// Проверяет, что сообщение доставляется подписчику, а счётчики
    /// обновлены правильно.
    #[tokio::test]
    async fn test_publish_and_receive() {
        let broker = Broker::new(5);
        let mut sub = broker.subscribe("ping/command");
        let delivered = broker.publish("ping/command", Bytes::from_static(b"x"));
        assert_eq!(delivered, 1);

        let msg = timeout(Duration::from_millis(50), sub.recv())
            .await
            .expect("timed out")
            .expect("no message");
        assert_eq!(&*msg.topic, "ping/command");
        assert_eq!(msg.payload, Bytes::from_static(b"x"));
        assert_eq!(broker.publish_count.load(Ordering::Relaxed), 1);
        assert_eq!(broker.send_error_count.load(Ordering::Relaxed), 0);
    }

    /// Проверяет, что публикация в тему без подписчиков не создаёт её.
    #[tokio::test]
    async fn test_publish_to_nonexistent_topic() {
        let broker = Broker::new(5);
        assert_eq!(broker.publish("nobody", Bytes::from_static(b"z")), 0);
        assert_eq!(broker.send_error_count.load(Ordering::Relaxed), 0);
        assert_eq!(broker.topic_count(), 0);
    }

    /// Проверяет, что все подписчики темы получают сообщение.
    #[tokio::test]
    async fn test_multiple_subscribers_receive() {
        let broker = Broker::new(5);
        let mut subs = (0..3)
            .map(|_| broker.subscribe("ping/command"))
            .collect::<Vec<_>>();

        assert_eq!(broker.publish("ping/command", Bytes::from_static(b"d")), 3);
        for sub in subs.iter_mut() {
            let msg = sub.recv().await.expect("no msg");
            assert_eq!(msg.payload, Bytes::from_static(b"d"));
        }
    }

    /// Проверяет, что drop последней подписки сразу освобождает тему, а
    /// оставшаяся подписка её удерживает.
    #[tokio::test]
    async fn test_drop_last_subscription_releases_topic() {
        let broker = Broker::new(5);
        let first = broker.subscribe("pong/s1/response");
        let second = broker.subscribe("pong/s1/response");
        assert_eq!(broker.topic_count(), 1);

        drop(first);
        assert_eq!(broker.topic_count(), 1);
        drop(second);
        assert_eq!(broker.topic_count(), 0);

        assert_eq!(broker.publish("pong/s1/response", Bytes::from_static(b"u")), 0);
        assert_eq!(broker.send_error_count.load(Ordering::Relaxed), 0);
    }

    /// Проверяет, что тема, созданная заново после освобождения, снова
    /// получает сообщения.
    #[tokio::test]
    async fn test_resubscribe_after_release() {
        let broker = Broker::new(5);
        drop(broker.subscribe("temp"));
        let mut sub = broker.subscribe("temp");
        assert_eq!(broker.publish("temp", Bytes::from_static(b"again")), 1);
        assert_eq!(sub.recv().await.unwrap().payload, Bytes::from_static(b"again"));
    }

    /// Проверяет, что подписка по шаблону получает ответы любой сессии.
    #[tokio::test]
    async fn test_psubscribe_matches_session_topics() {
        let broker = Broker::new(5);
        let mut psub = broker.psubscribe("pong/*/response").unwrap();

        broker.publish("pong/s1/response", Bytes::from_static(b"A"));
        broker.publish("ping/command", Bytes::from_static(b"B"));
        broker.publish("pong/s2/response", Bytes::from_static(b"C"));

        let m1 = psub.recv().await.unwrap();
        let m2 = psub.recv().await.unwrap();
        assert_eq!(&*m1.topic, "pong/s1/response");
        assert_eq!(&*m2.topic, "pong/s2/response");
        assert!(psub.is_empty());
    }

    /// Проверяет, что после `punsubscribe` приёмник закрывается.
    #[tokio::test]
    async fn test_punsubscribe_closes_receiver() {
        let broker = Broker::new(5);
        let mut psub = broker.psubscribe("a?c").unwrap();
        broker.punsubscribe("a?c");
        assert!(matches!(psub.recv().await, Err(RecvError::Closed)));
    }

    /// Проверяет, что drop подписки по шаблону освобождает шаблон.
    #[tokio::test]
    async fn test_drop_pattern_subscription_releases_pattern() {
        let broker = Broker::new(5);
        drop(broker.psubscribe("pong/*/response").unwrap());
        assert_eq!(broker.pattern_count(), 0);
        assert_eq!(broker.publish("pong/x/response", Bytes::from_static(b"1")), 0);
    }

    /// Проверяет, что drop старой подписки не трогает шаблон,
    /// пересозданный после `punsubscribe`.
    #[tokio::test]
    async fn test_stale_pattern_drop_keeps_new_entry() {
        let broker = Broker::new(5);
        let old = broker.psubscribe("pong/*/response").unwrap();
        broker.punsubscribe("pong/*/response");
        let mut fresh = broker.psubscribe("pong/*/response").unwrap();

        drop(old);
        assert_eq!(broker.pattern_count(), 1);
        broker.publish("pong/s9/response", Bytes::from_static(b"ok"));
        assert_eq!(&*fresh.recv().await.unwrap().topic, "pong/s9/response");
    }

    /// Проверяет, что при некорректном шаблоне возвращается ошибка.
    #[test]
    fn test_invalid_glob_pattern() {
        let broker = Broker::new(5);
        assert!(broker.psubscribe("[invalid[").is_err());
    }
}
