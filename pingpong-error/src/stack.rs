use std::{fmt, panic::Location, sync::Arc};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::{ErrorExt, StatusCode};

/// Ошибка с кодом статуса и цепочкой контекста.
///
/// Контекст добавляется по мере подъёма ошибки по стеку вызовов вместе с
/// местом вызова.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Arc<Vec<ErrorContext>>,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: &'static Location<'static>,
}

/// JSON-представление ошибки для `pingpong-cli --output json`.
#[cfg(feature = "serde")]
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<String>,
}

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Arc::new(Vec::new()),
        }
    }

    /// Добавляет контекст к ошибке.
    #[track_caller]
    pub fn context(
        self,
        msg: impl Into<String>,
    ) -> Self {
        self.context_at(msg.into(), Location::caller())
    }

    pub(crate) fn context_at(
        mut self,
        message: String,
        location: &'static Location<'static>,
    ) -> Self {
        Arc::make_mut(&mut self.contexts).push(ErrorContext { message, location });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    /// Контексты от самого внутреннего к внешнему.
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    #[cfg(feature = "serde")]
    pub fn to_response(&self) -> ErrorResponse {
        let status = format!("{:?}", self.status_code());
        ErrorResponse {
            code: self.status_code().code(),
            status,
            message: self.inner.client_message(),
            contexts: self.contexts.iter().map(|c| c.message.clone()).collect(),
        }
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug.field("inner", &self.inner.to_string());
        debug.field("status_code", &self.status_code());
        if !self.contexts.is_empty() {
            let contexts: Vec<String> = self
                .contexts
                .iter()
                .map(|c| format!("{} ({}:{})", c.message, c.location.file(), c.location.line()))
                .collect();
            debug.field("contexts", &contexts);
        }
        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // внешний контекст первым: "opening session: subscribing: cause"
        for ctx in self.contexts.iter().rev() {
            write!(f, "{}: ", ctx.message)?;
        }
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionError, TransportError};

    #[test]
    fn test_context_chain() {
        let stack = StackError::new(TransportError::NotConnected)
            .context("publishing command")
            .context("opening session 's1'");

        assert_eq!(stack.contexts().len(), 2);
        assert_eq!(stack.contexts()[0].message, "publishing command");
        assert!(stack.contexts()[0].location.file().ends_with("stack.rs"));
        assert_eq!(stack.status_code(), StatusCode::NotConnected);
        assert_eq!(
            stack.to_string(),
            "opening session 's1': publishing command: Transport is not connected"
        );
    }

    #[test]
    fn test_clone_does_not_share_new_contexts() {
        let base = StackError::new(SessionError::Closed {
            session_id: "s1".to_string(),
        });
        let with_ctx = base.clone().context("request");
        assert!(base.contexts().is_empty());
        assert_eq!(with_ctx.contexts().len(), 1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_response_json() {
        let stack = StackError::new(SessionError::RequestTimeout {
            session_id: "s1".to_string(),
            timeout_ms: 250,
        })
        .context("waiting for RGBSet");

        let json = serde_json::to_value(stack.to_response()).unwrap();
        assert_eq!(json["code"], 7001);
        assert_eq!(json["status"], "RequestTimeout");
        assert_eq!(json["contexts"][0], "waiting for RGBSet");
        assert!(json["message"].as_str().unwrap().contains("250ms"));
    }
}
