pub mod channel;
pub mod connection;
pub mod delivery;
pub mod disposed;
pub mod publish;
pub mod subscribe;
pub mod topology;

// Публичный экспорт всех типов ошибок из вложенных модулей.
pub use channel::*;
pub use connection::*;
pub use delivery::*;
pub use disposed::*;
pub use publish::*;
pub use subscribe::*;
pub use topology::*;

use crate::{ErrorExt, StatusCode};

/// Универсальная ошибка с кодом и сообщением.
///
/// Её собирает `bail!(code, ...)`; подходит и для ошибок, которым не нужен
/// отдельный тип.
#[derive(Debug, Clone)]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for GenericError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenericError {}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
