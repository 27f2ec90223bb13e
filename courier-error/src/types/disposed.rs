use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Вызов метода у объекта, который уже закрыт.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDisposedError {
    pub object: &'static str,
}

impl ObjectDisposedError {
    pub const fn new(object: &'static str) -> Self {
        Self { object }
    }
}

impl std::fmt::Display for ObjectDisposedError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{} has been closed", self.object)
    }
}

impl std::error::Error for ObjectDisposedError {}

impl ErrorExt for ObjectDisposedError {
    fn status_code(&self) -> StatusCode {
        StatusCode::Disposed
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
