//! Сторона коммандера: сессия, буфер ответов и типизированные команды.

pub mod buffer;
pub mod channel;
pub mod commander;

pub use buffer::{OverflowPolicy, PushOutcome, ResponseBuffer};
pub use channel::{generate_session_id, SessionChannel, SessionConfig};
pub use commander::{rgb_payload, weight_payload, Commander};
