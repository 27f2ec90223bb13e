use std::any::Any;

use crate::{ErrorExt, Resource, StatusCode};

/// Ошибки объявления топологии (exchange, очереди, привязки).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Конфигурация топологии некорректна
    InvalidConfig { reason: String },
    /// Объект уже объявлен с другими атрибутами
    PreconditionFailed {
        entity: &'static str,
        name: String,
        reason: String,
    },
    /// Exchange не объявлен на брокере
    ExchangeNotFound { exchange: String },
    /// Очередь не объявлена на брокере
    QueueNotFound { queue: String },
    /// Эксклюзивная очередь принадлежит другому соединению
    ResourceLocked { queue: String },
    /// Операция отменена вызывающим кодом
    Cancelled,
}

/// Публикация или подписка на топик, для которого не объявлен exchange.
///
/// Возникает до любого обращения к брокеру.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNotConfiguredError {
    pub topic: String,
}

impl TopicNotConfiguredError {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

impl std::fmt::Display for TopologyError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "Invalid topology configuration: {reason}"),
            Self::PreconditionFailed {
                entity,
                name,
                reason,
            } => write!(
                f,
                "Precondition failed: {entity} '{name}' redeclared with different attributes ({reason})"
            ),
            Self::ExchangeNotFound { exchange } => write!(f, "Exchange not found: '{exchange}'"),
            Self::QueueNotFound { queue } => write!(f, "Queue not found: '{queue}'"),
            Self::ResourceLocked { queue } => {
                write!(f, "Exclusive queue '{queue}' is owned by another connection")
            }
            Self::Cancelled => write!(f, "Topology declaration cancelled"),
        }
    }
}

impl std::error::Error for TopologyError {}

impl ErrorExt for TopologyError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidConfig { .. } => StatusCode::InvalidConfig,
            Self::PreconditionFailed { .. } => StatusCode::PreconditionFailed,
            Self::ExchangeNotFound { .. } => StatusCode::ExchangeNotFound,
            Self::QueueNotFound { .. } => StatusCode::QueueNotFound,
            Self::ResourceLocked { .. } => StatusCode::ResourceLocked,
            Self::Cancelled => StatusCode::Cancelled,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource(&self) -> Option<Resource<'_>> {
        match self {
            Self::PreconditionFailed { entity, name, .. } if *entity == "queue" => {
                Some(Resource::Queue(name))
            }
            Self::PreconditionFailed { name, .. } => Some(Resource::Exchange(name)),
            Self::ExchangeNotFound { exchange } => Some(Resource::Exchange(exchange)),
            Self::QueueNotFound { queue } | Self::ResourceLocked { queue } => {
                Some(Resource::Queue(queue))
            }
            Self::InvalidConfig { .. } | Self::Cancelled => None,
        }
    }
}

impl std::fmt::Display for TopicNotConfiguredError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Topic '{}' has no declared exchange", self.topic)
    }
}

impl std::error::Error for TopicNotConfiguredError {}

impl ErrorExt for TopicNotConfiguredError {
    fn status_code(&self) -> StatusCode {
        StatusCode::TopicNotConfigured
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource(&self) -> Option<Resource<'_>> {
        Some(Resource::Topic(&self.topic))
    }
}
