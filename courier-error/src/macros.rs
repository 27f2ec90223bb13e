use crate::{CourierResult, StackError};

/// Возвращает `Err(StackError)` из текущей функции.
///
/// `bail!(err)` принимает готовую типизированную ошибку, `bail!(code, fmt, ..)`
/// собирает `GenericError` с кодом и отформатированным сообщением.
///
/// ```ignore
/// bail!(StatusCode::AlreadyExists, "consumer tag '{}' is already in use", tag);
/// ```
#[macro_export]
macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $($fmt:tt)+) => {
        return Err($crate::StackError::new(
            $crate::types::GenericError::new($code, format!($($fmt)+))
        ))
    };
}

/// Кадры контекста для `Result` с любой ошибкой ядра.
pub trait ResultExt<T> {
    fn context(
        self,
        message: impl Into<String>,
    ) -> CourierResult<T>;

    /// Сообщение строится только на пути ошибки.
    fn with_context<M, F>(
        self,
        message: F,
    ) -> CourierResult<T>
    where
        M: Into<String>,
        F: FnOnce() -> M;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<StackError>,
{
    #[track_caller]
    fn context(
        self,
        message: impl Into<String>,
    ) -> CourierResult<T> {
        match self {
            Ok(value) => Ok(value),
            Err(e) => Err(e.into().context(message)),
        }
    }

    #[track_caller]
    fn with_context<M, F>(
        self,
        message: F,
    ) -> CourierResult<T>
    where
        M: Into<String>,
        F: FnOnce() -> M,
    {
        match self {
            Ok(value) => Ok(value),
            Err(e) => Err(e.into().context(message())),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
