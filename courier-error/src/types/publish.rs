use std::any::Any;

use crate::{ErrorExt, Resource, StatusCode};

/// Ошибки публикации сообщения в топик.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Не удалось сериализовать конверт
    Serialization { topic: String, reason: String },
    /// Транспорт не принял кадр
    Transport { topic: String, reason: String },
    /// Публикация отменена до передачи кадра транспорту
    Cancelled { topic: String },
}

impl std::fmt::Display for PublishError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Serialization { topic, reason } => {
                write!(f, "Failed to serialize envelope for '{topic}': {reason}")
            }
            Self::Transport { topic, reason } => {
                write!(f, "Failed to publish to '{topic}': {reason}")
            }
            Self::Cancelled { topic } => write!(f, "Publish to '{topic}' cancelled"),
        }
    }
}

impl std::error::Error for PublishError {}

impl ErrorExt for PublishError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Serialization { .. } => StatusCode::SerializationFailed,
            Self::Transport { .. } => StatusCode::PublishFailed,
            Self::Cancelled { .. } => StatusCode::Cancelled,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Serialization { .. } => "Message format error".to_string(),
            Self::Transport { topic, .. } => format!("Failed to publish to '{topic}'"),
            Self::Cancelled { .. } => "Publish cancelled".to_string(),
        }
    }

    fn resource(&self) -> Option<Resource<'_>> {
        match self {
            Self::Serialization { topic, .. }
            | Self::Transport { topic, .. }
            | Self::Cancelled { topic } => Some(Resource::Topic(topic)),
        }
    }
}
