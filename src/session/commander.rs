use std::sync::Arc;

use pingpong_error::PingPongResult;
use serde_json::json;

use super::{SessionChannel, SessionConfig};
use crate::{
    protocol::{Command, CommandType, Payload, Response},
    transport::Transport,
};

/// Данные команды `RGBSet`.
pub fn rgb_payload(
    r: i64,
    g: i64,
    b: i64,
) -> Payload {
    let mut data = Payload::new();
    data.insert("r".into(), json!(r));
    data.insert("g".into(), json!(g));
    data.insert("b".into(), json!(b));
    data
}

/// Данные команды `WeightMeasure`: новая скорость и запрос веса.
pub fn weight_payload(rpm: i64) -> Payload {
    let mut data = Payload::new();
    data.insert("set_rpm".into(), json!(rpm));
    data.insert("request_weight".into(), json!(true));
    data
}

/// Коммандер: типизированные команды устройства поверх
/// [`SessionChannel`].
///
/// `send_*` только публикуют, ответ забирается через
/// [`drain`](Self::drain)/[`next_response`](Self::next_response).
/// `request_*` ждут ответ на конкретную команду.
pub struct Commander {
    channel: SessionChannel,
}

impl Commander {
    pub fn new(channel: SessionChannel) -> Self {
        Self { channel }
    }

    /// Открывает новую сессию со сгенерированным id.
    pub async fn open(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> PingPongResult<Self> {
        Ok(Self::new(
            SessionChannel::open(transport, None, config).await?,
        ))
    }

    pub fn channel(&self) -> &SessionChannel {
        &self.channel
    }

    pub fn session_id(&self) -> &str {
        self.channel.session_id()
    }

    pub async fn send_rgb(
        &self,
        r: i64,
        g: i64,
        b: i64,
    ) -> PingPongResult<Command> {
        self.channel
            .send(CommandType::RgbSet, rgb_payload(r, g, b))
            .await
    }

    pub async fn send_weight_request(
        &self,
        rpm: i64,
    ) -> PingPongResult<Command> {
        self.channel
            .send(CommandType::WeightMeasure, weight_payload(rpm))
            .await
    }

    pub async fn send_temperature_request(&self) -> PingPongResult<Command> {
        self.channel
            .send(CommandType::TemperatureRead, Payload::new())
            .await
    }

    pub async fn request_rgb(
        &self,
        r: i64,
        g: i64,
        b: i64,
    ) -> PingPongResult<Response> {
        self.channel
            .request_default(CommandType::RgbSet, rgb_payload(r, g, b))
            .await
    }

    pub async fn request_weight(
        &self,
        rpm: i64,
    ) -> PingPongResult<Response> {
        self.channel
            .request_default(CommandType::WeightMeasure, weight_payload(rpm))
            .await
    }

    pub async fn request_temperature(&self) -> PingPongResult<Response> {
        self.channel
            .request_default(CommandType::TemperatureRead, Payload::new())
            .await
    }

    pub fn drain(&self) -> Vec<Response> {
        self.channel.drain()
    }

    pub async fn next_response(&self) -> Option<Response> {
        self.channel.recv().await
    }

    pub async fn close(&self) -> PingPongResult<()> {
        self.channel.close().await
    }
}
