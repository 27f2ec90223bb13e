use std::any::Any;

use crate::{ErrorExt, Resource, StatusCode};

/// Входящее сообщение не удалось разобрать как конверт.
///
/// Никогда не возвращается вызывающему коду: подписчик логирует её,
/// отправляет событие и подтверждает доставку.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeDeserializationError {
    pub topic: String,
    pub reason: String,
}

/// Обработчик подписки завершился ошибкой или паникой.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerExecutionError {
    pub topic: String,
    pub consumer_tag: String,
    pub reason: String,
    pub panicked: bool,
}

impl EnvelopeDeserializationError {
    pub fn new(
        topic: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

impl HandlerExecutionError {
    pub fn failed(
        topic: impl Into<String>,
        consumer_tag: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            consumer_tag: consumer_tag.into(),
            reason: reason.into(),
            panicked: false,
        }
    }

    pub fn panicked(
        topic: impl Into<String>,
        consumer_tag: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            panicked: true,
            ..Self::failed(topic, consumer_tag, reason)
        }
    }

    /// Строит ошибку из результата `JoinHandle` задачи обработчика.
    #[cfg(feature = "tokio")]
    pub fn from_join_error(
        topic: impl Into<String>,
        consumer_tag: impl Into<String>,
        err: tokio::task::JoinError,
    ) -> Self {
        if err.is_panic() {
            let payload = err.into_panic();
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Self::panicked(topic, consumer_tag, reason)
        } else {
            Self::failed(topic, consumer_tag, "handler task was cancelled")
        }
    }
}

impl std::fmt::Display for EnvelopeDeserializationError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "Failed to deserialize envelope from '{}': {}",
            self.topic, self.reason
        )
    }
}

impl std::error::Error for EnvelopeDeserializationError {}

impl ErrorExt for EnvelopeDeserializationError {
    fn status_code(&self) -> StatusCode {
        StatusCode::DeserializationFailed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource(&self) -> Option<Resource<'_>> {
        Some(Resource::Topic(&self.topic))
    }
}

impl std::fmt::Display for HandlerExecutionError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let verb = if self.panicked { "panicked" } else { "failed" };
        write!(
            f,
            "Handler for '{}' (consumer {}) {verb}: {}",
            self.topic, self.consumer_tag, self.reason
        )
    }
}

impl std::error::Error for HandlerExecutionError {}

impl ErrorExt for HandlerExecutionError {
    fn status_code(&self) -> StatusCode {
        StatusCode::HandlerFailed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource(&self) -> Option<Resource<'_>> {
        Some(Resource::Topic(&self.topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_error() {
        let err = EnvelopeDeserializationError::new("orders", "expected value at line 1");
        assert_eq!(err.status_code(), StatusCode::DeserializationFailed);
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_handler_error_variants() {
        let failed = HandlerExecutionError::failed("orders", "ctag-1", "db down");
        assert!(!failed.panicked);
        assert!(failed.to_string().contains("failed: db down"));

        let panicked = HandlerExecutionError::panicked("orders", "ctag-1", "index out of bounds");
        assert!(panicked.panicked);
        assert!(panicked.to_string().contains("panicked"));
        assert_eq!(panicked.resource(), Some(Resource::Topic("orders")));
    }
}
