use std::any::Any;

use crate::{ErrorExt, Resource, StatusCode};

/// Ошибки регистрации подписки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// Очередь для подписки не найдена на брокере
    QueueNotFound { topic: String, queue: String },
    /// Брокер отказал в регистрации потребителя
    ConsumeFailed { topic: String, reason: String },
    /// Подписка отменена во время регистрации
    Cancelled { topic: String },
}

impl std::fmt::Display for SubscribeError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::QueueNotFound { topic, queue } => {
                write!(f, "Queue '{queue}' for topic '{topic}' not found")
            }
            Self::ConsumeFailed { topic, reason } => {
                write!(f, "Failed to start consuming '{topic}': {reason}")
            }
            Self::Cancelled { topic } => write!(f, "Subscription to '{topic}' cancelled"),
        }
    }
}

impl std::error::Error for SubscribeError {}

impl ErrorExt for SubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::QueueNotFound { .. } => StatusCode::QueueNotFound,
            Self::ConsumeFailed { .. } => StatusCode::ConsumeFailed,
            Self::Cancelled { .. } => StatusCode::Cancelled,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource(&self) -> Option<Resource<'_>> {
        match self {
            Self::QueueNotFound { queue, .. } => Some(Resource::Queue(queue)),
            Self::ConsumeFailed { topic, .. } | Self::Cancelled { topic } => {
                Some(Resource::Topic(topic))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err = SubscribeError::QueueNotFound {
            topic: "orders".into(),
            queue: "orders.created".into(),
        };
        assert_eq!(err.status_code(), StatusCode::QueueNotFound);
        assert!(err.to_string().contains("orders.created"));
        assert_eq!(err.resource(), Some(Resource::Queue("orders.created")));
        assert_eq!(
            SubscribeError::Cancelled { topic: "x".into() }.status_code(),
            StatusCode::Cancelled
        );
    }
}
