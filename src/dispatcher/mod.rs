//! Диспетчер команд.
//!
//! Сопоставляет тип команды с обработчиком, выполняет обработчик под
//! блокировкой записи устройства и строит ответ. Неизвестные типы не
//! отбрасываются: на них приходит ответ `{error: "Unknown command type"}`.

pub mod handlers;
pub mod registry;

use std::sync::Arc;

use parking_lot::Mutex;
use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, warn};

pub use registry::*;

use crate::{
    device::{DeviceRegistry, RangePolicy},
    protocol::{Command, Response, UNKNOWN_COMMAND_TYPE},
};

pub struct Dispatcher {
    registry: HandlerRegistry,
    devices: Arc<DeviceRegistry>,
    rng: Mutex<StdRng>,
    policy: RangePolicy,
}

impl Dispatcher {
    /// Диспетчер со встроенными обработчиками и генератором из энтропии ОС.
    pub fn new(
        devices: Arc<DeviceRegistry>,
        policy: RangePolicy,
    ) -> Self {
        Self::with_rng(devices, policy, StdRng::from_entropy())
    }

    /// Диспетчер с детерминированным генератором.
    pub fn with_seed(
        devices: Arc<DeviceRegistry>,
        policy: RangePolicy,
        seed: u64,
    ) -> Self {
        Self::with_rng(devices, policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        devices: Arc<DeviceRegistry>,
        policy: RangePolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            registry: HandlerRegistry::with_builtin(),
            devices,
            rng: Mutex::new(rng),
            policy,
        }
    }

    /// Заменяет таблицу обработчиков.
    pub fn with_registry(
        mut self,
        registry: HandlerRegistry,
    ) -> Self {
        self.registry = registry;
        self
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn policy(&self) -> RangePolicy {
        self.policy
    }

    /// Обрабатывает команду и возвращает ответ.
    ///
    /// Чтение, изменение устройства и построение ответа выполняются под
    /// одной блокировкой записи устройства.
    pub fn dispatch(
        &self,
        command: &Command,
    ) -> Response {
        if !self.registry.contains(&command.command_type) {
            warn!(
                session_id = %command.session_id,
                command_type = %command.command_type,
                "Unknown command type"
            );
            return Response::error(command, UNKNOWN_COMMAND_TYPE);
        }

        let device = self.devices.device(&command.session_id);
        let mut state = device.lock();
        let mut rng = self.rng.lock();
        // Работаем с копией, чтобы при ошибке устройство осталось прежним.
        let mut draft = state.clone();
        let mut ctx = HandlerContext {
            device: &mut draft,
            rng: &mut *rng,
            policy: self.policy,
        };

        match self
            .registry
            .call(&command.command_type, &mut ctx, &command.data)
        {
            Some(Ok(data)) => {
                *state = draft;
                debug!(
                    session_id = %command.session_id,
                    command_type = %command.command_type,
                    "Command applied"
                );
                Response::for_command(command, data)
            }
            Some(Err(reason)) => {
                debug!(
                    session_id = %command.session_id,
                    command_type = %command.command_type,
                    %reason,
                    "Command rejected"
                );
                Response::error(command, reason)
            }
            None => Response::error(command, UNKNOWN_COMMAND_TYPE),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        device::{DeviceScope, Rgb},
        protocol::{CommandType, Payload},
    };

    fn command(
        kind: &str,
        data: serde_json::Value,
        session: &str,
    ) -> Command {
        let data: Payload = serde_json::from_value(data).unwrap();
        Command::new(CommandType::from(kind), data, session)
    }

    fn dispatcher(scope: DeviceScope) -> Dispatcher {
        Dispatcher::with_seed(
            Arc::new(DeviceRegistry::new(scope)),
            RangePolicy::PassThrough,
            42,
        )
    }

    /// Тест проверяет ответ на неизвестный тип: ровно `{error: ...}` и эхо
    /// типа и сессии.
    #[test]
    fn test_unknown_type() {
        let d = dispatcher(DeviceScope::Shared);
        let resp = d.dispatch(&command("Foo", json!({"x": 1}), "s1"));

        assert_eq!(resp.command_type, CommandType::from("Foo"));
        assert_eq!(resp.session_id, "s1");
        assert_eq!(
            serde_json::to_value(&resp.data).unwrap(),
            json!({"error": "Unknown command type"})
        );
    }

    #[test]
    fn test_rgb_set_then_snapshot() {
        let d = dispatcher(DeviceScope::Shared);
        let resp = d.dispatch(&command("RGBSet", json!({"r": 10, "g": 20, "b": 30}), "s1"));

        assert_eq!(resp.data["applied_values"], json!({"r": 10, "g": 20, "b": 30}));
        assert_eq!(d.devices().snapshot("s1").rgb, Rgb { r: 10, g: 20, b: 30 });
    }

    /// Тест проверяет, что ошибка обработчика не меняет устройство.
    #[test]
    fn test_rejected_command_leaves_state() {
        let d = Dispatcher::with_seed(
            Arc::new(DeviceRegistry::default()),
            RangePolicy::Reject,
            1,
        );
        d.dispatch(&command("WeightMeasure", json!({"set_rpm": 100}), "s1"));
        let resp = d.dispatch(&command("WeightMeasure", json!({"set_rpm": 9000}), "s1"));

        assert!(resp.is_error());
        assert_eq!(resp.command_type, CommandType::WeightMeasure);
        assert_eq!(d.devices().snapshot("s1").rpm, 100);
    }

    /// Тест проверяет, что общее устройство видно из всех сессий.
    #[test]
    fn test_shared_device_across_sessions() {
        let d = dispatcher(DeviceScope::Shared);
        d.dispatch(&command("WeightMeasure", json!({"set_rpm": 1500}), "a"));
        let resp = d.dispatch(&command("WeightMeasure", json!({}), "b"));
        assert_eq!(resp.data["current_rpm"], json!(1500));
    }

    #[test]
    fn test_per_session_device_isolated() {
        let d = dispatcher(DeviceScope::PerSession);
        d.dispatch(&command("WeightMeasure", json!({"set_rpm": 1500}), "a"));
        let resp = d.dispatch(&command("WeightMeasure", json!({}), "b"));
        assert_eq!(resp.data["current_rpm"], json!(0));
    }

    /// Тест проверяет, что одинаковое зерно даёт одинаковые ответы.
    #[test]
    fn test_seeded_dispatch_is_deterministic() {
        let a = dispatcher(DeviceScope::Shared);
        let b = dispatcher(DeviceScope::Shared);
        let cmd = command("TemperatureRead", json!({}), "s1");

        assert_eq!(a.dispatch(&cmd).data, b.dispatch(&cmd).data);
    }

    #[test]
    fn test_request_id_echoed() {
        let d = dispatcher(DeviceScope::Shared);
        let cmd = command("TemperatureRead", json!({}), "s1").with_request_id("req-1");
        assert_eq!(d.dispatch(&cmd).request_id.as_deref(), Some("req-1"));
    }
}
