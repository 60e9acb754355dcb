//! Проводной формат протокола команд и ответов.
//!
//! Сообщение — плоский JSON-объект с полями `type`, `data`, `session_id`,
//! `timestamp` и необязательным `request_id`.

pub mod codec;
pub mod command;
pub mod topics;

pub use codec::*;
pub use command::*;
pub use topics::*;
