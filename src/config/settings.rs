use std::{path::Path, sync::Arc, time::Duration};

use config::{Config, ConfigError, Environment, File};
use pingpong_error::{ensure, GenericError, PingPongResult, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    device::{DeviceRegistry, DeviceScope, RangePolicy},
    dispatcher::Dispatcher,
    logging::LoggingConfig,
    responder::ResponderConfig,
    session::{OverflowPolicy, SessionConfig},
    streaming::StreamingConfig,
    transport::TcpTransportConfig,
};

/// Имя конфигурационного файла, который ищется в текущем каталоге
/// (`pingpong.toml`, `pingpong.yaml` и т.д.).
const DEFAULT_CONFIG_NAME: &str = "pingpong";

/// Настройки TCP-сервера брокера.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub listen: String,
    pub max_connections: usize,
    /// Ёмкость broadcast-каналов брокера и очереди исходящих кадров
    pub channel_capacity: usize,
    pub write_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

/// Настройки клиентского подключения к брокеру.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub address: String,
    pub connect_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    /// `0` отключает keepalive
    pub keepalive_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderSettings {
    pub queue_capacity: usize,
    pub publish_timeout_ms: u64,
    pub device_scope: DeviceScope,
    pub range_policy: RangePolicy,
    /// Фиксированное зерно генератора, для воспроизводимых прогонов
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub response_buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub interval_ms: u64,
    pub stop_timeout_ms: u64,
    pub publish_timeout_ms: u64,
}

/// Полная конфигурация процесса.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub transport: TransportSettings,
    pub responder: ResponderSettings,
    pub session: SessionSettings,
    pub streaming: StreamingSettings,
    pub logging: LoggingConfig,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:6380".to_string(),
            max_connections: 1024,
            channel_capacity: 1024,
            write_timeout_ms: 5_000,
            idle_timeout_ms: 300_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6380".to_string(),
            connect_timeout_ms: 5_000,
            publish_timeout_ms: 2_000,
            ack_timeout_ms: 5_000,
            keepalive_ms: 15_000,
        }
    }
}

impl Default for ResponderSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            publish_timeout_ms: 2_000,
            device_scope: DeviceScope::default(),
            range_policy: RangePolicy::default(),
            seed: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            response_buffer_capacity: 1024,
            overflow_policy: OverflowPolicy::default(),
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            stop_timeout_ms: 2_000,
            publish_timeout_ms: 2_000,
        }
    }
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем необязательный
    /// `pingpong.{toml,yaml,json}` из текущего каталога, затем окружение.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name(DEFAULT_CONFIG_NAME).required(false))
    }

    /// Как [`Settings::load`], но файл обязателен и задаётся явно.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = Config::builder()
            .add_source(file)
            // PINGPONG_BROKER__LISTEN, PINGPONG_RESPONDER__SEED, ...
            .add_source(
                Environment::with_prefix("PINGPONG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize()
    }

    /// Отклоняет нулевые ёмкости и интервалы.
    pub fn validate(&self) -> PingPongResult<()> {
        let broker = &self.broker;
        ensure!(
            !broker.listen.is_empty(),
            StatusCode::InvalidConfig,
            "broker.listen must not be empty"
        );
        ensure!(
            broker.max_connections > 0,
            StatusCode::InvalidConfig,
            "broker.max_connections must be positive"
        );
        ensure!(
            broker.channel_capacity > 0,
            StatusCode::InvalidConfig,
            "broker.channel_capacity must be positive"
        );
        ensure!(
            broker.idle_timeout_ms > 0 && broker.write_timeout_ms > 0,
            StatusCode::InvalidConfig,
            "broker timeouts must be positive"
        );

        let transport = &self.transport;
        ensure!(
            !transport.address.is_empty(),
            StatusCode::InvalidConfig,
            "transport.address must not be empty"
        );
        ensure!(
            transport.connect_timeout_ms > 0
                && transport.publish_timeout_ms > 0
                && transport.ack_timeout_ms > 0,
            StatusCode::InvalidConfig,
            "transport timeouts must be positive"
        );

        ensure!(
            self.responder.queue_capacity > 0,
            StatusCode::InvalidConfig,
            "responder.queue_capacity must be positive"
        );
        ensure!(
            self.responder.publish_timeout_ms > 0,
            StatusCode::InvalidConfig,
            "responder.publish_timeout_ms must be positive"
        );

        ensure!(
            self.session.response_buffer_capacity > 0,
            StatusCode::InvalidConfig,
            "session.response_buffer_capacity must be positive"
        );
        ensure!(
            self.session.request_timeout_ms > 0,
            StatusCode::InvalidConfig,
            "session.request_timeout_ms must be positive"
        );

        let streaming = &self.streaming;
        ensure!(
            streaming.interval_ms > 0,
            StatusCode::InvalidConfig,
            "streaming.interval_ms must be positive"
        );
        ensure!(
            streaming.stop_timeout_ms > 0 && streaming.publish_timeout_ms > 0,
            StatusCode::InvalidConfig,
            "streaming timeouts must be positive"
        );

        self.logging
            .validate()
            .map_err(|e| GenericError::new(StatusCode::InvalidConfig, e.to_string()))?;
        Ok(())
    }
}

impl BrokerSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl ResponderSettings {
    /// Диспетчер с реестром устройств, политикой диапазонов и зерном из
    /// настроек.
    pub fn dispatcher(&self) -> Dispatcher {
        let devices = Arc::new(DeviceRegistry::new(self.device_scope));
        match self.seed {
            Some(seed) => Dispatcher::with_seed(devices, self.range_policy, seed),
            None => Dispatcher::new(devices, self.range_policy),
        }
    }
}

impl From<&TransportSettings> for TcpTransportConfig {
    fn from(settings: &TransportSettings) -> Self {
        Self {
            address: settings.address.clone(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            publish_timeout: Duration::from_millis(settings.publish_timeout_ms),
            ack_timeout: Duration::from_millis(settings.ack_timeout_ms),
            keepalive: (settings.keepalive_ms > 0)
                .then(|| Duration::from_millis(settings.keepalive_ms)),
        }
    }
}

impl From<&ResponderSettings> for ResponderConfig {
    fn from(settings: &ResponderSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            publish_timeout: Duration::from_millis(settings.publish_timeout_ms),
        }
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            buffer_capacity: settings.response_buffer_capacity,
            overflow_policy: settings.overflow_policy,
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }
}

impl From<&StreamingSettings> for StreamingConfig {
    fn from(settings: &StreamingSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.interval_ms),
            stop_timeout: Duration::from_millis(settings.stop_timeout_ms),
            publish_timeout: Duration::from_millis(settings.publish_timeout_ms),
        }
    }
}
