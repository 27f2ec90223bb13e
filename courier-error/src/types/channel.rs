use std::any::Any;

use crate::{ErrorExt, Resource, StatusCode};

/// Ошибки открытия и использования канала.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Нет открытого соединения, на котором можно открыть канал
    ConnectionNotOpen,
    /// Брокер отказал в открытии канала
    OpenFailed { reason: String },
    /// Канал уже закрыт
    Closed { channel_id: u64 },
    /// Превышено число каналов на соединение
    LimitExceeded { limit: usize },
}

impl std::fmt::Display for ChannelError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ConnectionNotOpen => write!(f, "No open broker connection to create a channel on"),
            Self::OpenFailed { reason } => write!(f, "Failed to open channel: {reason}"),
            Self::Closed { channel_id } => write!(f, "Channel {channel_id} is closed"),
            Self::LimitExceeded { limit } => {
                write!(f, "Channel limit ({limit}) exceeded for connection")
            }
        }
    }
}

impl std::error::Error for ChannelError {}

impl ErrorExt for ChannelError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionNotOpen => StatusCode::ConnectionNotOpen,
            Self::OpenFailed { .. } => StatusCode::ChannelFailed,
            Self::Closed { .. } => StatusCode::ChannelClosed,
            Self::LimitExceeded { .. } => StatusCode::ChannelLimitExceeded,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn resource(&self) -> Option<Resource<'_>> {
        match self {
            Self::Closed { channel_id } => Some(Resource::Channel(*channel_id)),
            _ => None,
        }
    }
}
