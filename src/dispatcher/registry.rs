use std::collections::HashMap;

use rand::rngs::StdRng;

use crate::{
    device::{DeviceState, RangePolicy},
    protocol::{CommandType, Payload},
};

/// Контекст, передаваемый обработчику: запись устройства под блокировкой,
/// генератор случайных чисел и политика диапазонов.
pub struct HandlerContext<'a> {
    pub device: &'a mut DeviceState,
    pub rng: &'a mut StdRng,
    pub policy: RangePolicy,
}

/// Результат обработчика: данные ответа или причина ошибки.
///
/// При ошибке состояние устройства не должно меняться.
pub type HandlerResult = Result<Payload, String>;

/// Ф-я обработчик команды: получает контекст и `data` команды.
pub type Handler = Box<dyn Fn(&mut HandlerContext<'_>, &Payload) -> HandlerResult + Send + Sync>;

/// Таблица маршрутизации `CommandType → Handler`.
pub struct HandlerRegistry {
    handlers: HashMap<CommandType, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Реестр со встроенными обработчиками `RGBSet`, `TemperatureRead` и
    /// `WeightMeasure`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CommandType::RgbSet, super::handlers::rgb_set);
        registry.register(CommandType::TemperatureRead, super::handlers::temperature_read);
        registry.register(CommandType::WeightMeasure, super::handlers::weight_measure);
        registry
    }

    /// Регистрирует обработчик `h` для типа `kind`, заменяя прежний.
    pub fn register<F>(
        &mut self,
        kind: CommandType,
        h: F,
    ) where
        F: Fn(&mut HandlerContext<'_>, &Payload) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Box::new(h));
    }

    pub fn contains(
        &self,
        kind: &CommandType,
    ) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Вызывает обработчик для `kind`. Возвращает `None`, если тип не
    /// зарегистрирован.
    pub fn call(
        &self,
        kind: &CommandType,
        ctx: &mut HandlerContext<'_>,
        data: &Payload,
    ) -> Option<HandlerResult> {
        self.handlers.get(kind).map(|h| h(ctx, data))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use serde_json::json;

    use super::*;

    /// Тест проверяет регистрацию и вызов собственного обработчика.
    #[test]
    fn test_register_and_call() {
        let mut registry = HandlerRegistry::new();
        let kind = CommandType::from("Reset");
        registry.register(kind.clone(), |ctx, _data| {
            *ctx.device = DeviceState::default();
            let mut out = Payload::new();
            out.insert("reset".into(), json!(true));
            Ok(out)
        });

        let mut device = DeviceState {
            rpm: 42,
            ..DeviceState::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = HandlerContext {
            device: &mut device,
            rng: &mut rng,
            policy: RangePolicy::PassThrough,
        };

        let out = registry.call(&kind, &mut ctx, &Payload::new()).unwrap().unwrap();
        assert_eq!(out["reset"], json!(true));
        assert_eq!(device.rpm, 0);
    }

    /// Тест проверяет, что незарегистрированный тип даёт `None`, а не
    /// панику.
    #[test]
    fn test_call_unknown_returns_none() {
        let registry = HandlerRegistry::with_builtin();
        let mut device = DeviceState::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = HandlerContext {
            device: &mut device,
            rng: &mut rng,
            policy: RangePolicy::PassThrough,
        };
        assert!(registry
            .call(&CommandType::from("Foo"), &mut ctx, &Payload::new())
            .is_none());
        assert!(registry.contains(&CommandType::RgbSet));
    }
}
