use rand::Rng;
use serde_json::{json, Value};

use super::{HandlerContext, HandlerResult};
use crate::{
    device::{Rgb, RGB_RANGE, RPM_RANGE},
    protocol::Payload,
};

/// Читает целое поле из `data`.
///
/// `Ok(None)` если поле отсутствует. Вещественные значения усекаются к
/// нулю. Нечисловые значения дают ошибку.
fn int_field(
    data: &Payload,
    name: &str,
) -> Result<Option<i64>, String> {
    let Some(value) = data.get(name) else {
        return Ok(None);
    };
    let Value::Number(n) = value else {
        return Err(format!("{name} must be numeric"));
    };
    if let Some(i) = n.as_i64() {
        return Ok(Some(i));
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Ok(Some(f.trunc() as i64)),
        _ => Err(format!("{name} is out of integer range")),
    }
}

fn required_int(
    data: &Payload,
    name: &str,
) -> Result<i64, String> {
    int_field(data, name)?.ok_or_else(|| format!("RGBSet requires numeric {name}"))
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// `RGBSet`: устанавливает цвет из `r`, `g`, `b`.
pub fn rgb_set(
    ctx: &mut HandlerContext<'_>,
    data: &Payload,
) -> HandlerResult {
    let r = ctx.policy.apply("r", required_int(data, "r")?, RGB_RANGE)?;
    let g = ctx.policy.apply("g", required_int(data, "g")?, RGB_RANGE)?;
    let b = ctx.policy.apply("b", required_int(data, "b")?, RGB_RANGE)?;

    ctx.device.rgb = Rgb { r, g, b };

    Ok(into_payload(json!({
        "current_state": "applied",
        "power_consumption": ctx.rng.gen_range(0.1..1.0),
        "applied_values": {"r": r, "g": g, "b": b},
    })))
}

/// `TemperatureRead`: температура дрейфует на величину из `[-0.5, 0.5]`.
pub fn temperature_read(
    ctx: &mut HandlerContext<'_>,
    _data: &Payload,
) -> HandlerResult {
    ctx.device.temperature += ctx.rng.gen_range(-0.5..=0.5);

    Ok(into_payload(json!({
        "current_temperature": ctx.device.temperature,
        "humidity": ctx.rng.gen_range(40.0..=60.0),
        "pressure": ctx.rng.gen_range(980.0..=1020.0),
    })))
}

/// `WeightMeasure`: при наличии `set_rpm` меняет скорость вращения.
pub fn weight_measure(
    ctx: &mut HandlerContext<'_>,
    data: &Payload,
) -> HandlerResult {
    if let Some(rpm) = int_field(data, "set_rpm")? {
        ctx.device.rpm = ctx.policy.apply("set_rpm", rpm, RPM_RANGE)?;
    }

    Ok(into_payload(json!({
        "calibrated_weight": ctx.rng.gen_range(95.0..=105.0),
        "current_rpm": ctx.device.rpm,
        "stability": ctx.rng.gen_range(0.98..=1.02),
    })))
}
