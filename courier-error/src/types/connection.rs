use std::any::Any;

use crate::{ErrorExt, Resource, StatusCode};

/// Ошибки установления и поддержания соединения с брокером.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Брокер недоступен по адресу
    Unreachable { address: String, reason: String },
    /// Брокер отклонил учётные данные
    AuthenticationFailed { username: String },
    /// Виртуальный хост не существует
    VirtualHostNotFound { vhost: String },
    /// Попытка подключения не уложилась в таймаут
    Timeout { timeout_ms: u64 },
    /// Соединение закрыто
    Closed { reason: Option<String> },
}

impl std::fmt::Display for ConnectionError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Unreachable { address, reason } => {
                write!(f, "Broker unreachable at {address}: {reason}")
            }
            Self::AuthenticationFailed { username } => {
                write!(f, "Broker rejected credentials for user '{username}'")
            }
            Self::VirtualHostNotFound { vhost } => {
                write!(f, "Virtual host not found: {vhost}")
            }
            Self::Timeout { timeout_ms } => {
                write!(f, "Connection attempt timed out after {timeout_ms} ms")
            }
            Self::Closed { reason } => match reason {
                Some(r) => write!(f, "Connection closed: {r}"),
                None => write!(f, "Connection closed"),
            },
        }
    }
}

impl std::error::Error for ConnectionError {}

impl ErrorExt for ConnectionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unreachable { .. } => StatusCode::ConnectionFailed,
            Self::AuthenticationFailed { .. } => StatusCode::AuthFailed,
            Self::VirtualHostNotFound { .. } => StatusCode::VirtualHostNotFound,
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::Closed { .. } => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::Unreachable { .. } => "Message broker is unreachable".to_string(),
            Self::AuthenticationFailed { .. } => "Broker authentication failed".to_string(),
            Self::VirtualHostNotFound { vhost } => format!("Virtual host not found: {vhost}"),
            Self::Timeout { .. } => "Broker connection timeout".to_string(),
            Self::Closed { .. } => "Broker connection closed".to_string(),
        }
    }

    fn resource(&self) -> Option<Resource<'_>> {
        match self {
            Self::Unreachable { address, .. } => Some(Resource::Broker(address)),
            Self::VirtualHostNotFound { vhost } => Some(Resource::VirtualHost(vhost)),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
