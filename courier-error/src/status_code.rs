use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок подсистемы обмена сообщениями.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки и жизненный цикл объектов
/// - 2xxx: Ошибки данных и конфигурации
/// - 3xxx: Аутентификация / доступ к брокеру
/// - 4xxx: Лимиты и блокировки ресурсов
/// - 5xxx: Сериализация
/// - 6xxx: Соединения и каналы
/// - 7xxx: Топология (exchange / queue / binding)
/// - 8xxx: Публикация и доставка
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    NotImplemented = 1005,
    Cancelled = 1006,
    Disposed = 1007,

    // === 2xxx: Данные и конфигурация ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidData = 2002,
    InvalidConfig = 2003,
    TopicNotConfigured = 2004,
    ExchangeNotFound = 2005,
    QueueNotFound = 2006,
    ConsumerNotFound = 2007,

    // === 3xxx: Доступ к брокеру ===
    AuthFailed = 3000,
    AccessRefused = 3001,
    VirtualHostNotFound = 3002,

    // === 4xxx: Лимиты ===
    RateLimited = 4000,
    ChannelLimitExceeded = 4001,
    ResourceLocked = 4002,

    // === 5xxx: Сериализация ===
    SerializationFailed = 5000,
    DeserializationFailed = 5001,

    // === 6xxx: Соединения/каналы ===
    Io = 6000,
    ConnectionFailed = 6001,
    ConnectionClosed = 6002,
    ConnectionNotOpen = 6003,
    Timeout = 6004,
    ChannelFailed = 6005,
    ChannelClosed = 6006,

    // === 7xxx: Топология ===
    PreconditionFailed = 7000,
    DeclareFailed = 7001,
    BindFailed = 7002,

    // === 8xxx: Публикация/доставка ===
    PublishFailed = 8000,
    ConsumeFailed = 8001,
    HandlerFailed = 8002,
    AckFailed = 8003,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    ///
    /// Сама подсистема повторов не делает: решение остаётся за вызывающим
    /// кодом, этот метод только подсказывает.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RateLimited
                | Self::ConnectionFailed
                | Self::ConnectionClosed
                | Self::ConnectionNotOpen
                | Self::ChannelClosed
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Является ли код ошибкой вызывающей стороны (неверные аргументы,
    /// неизвестный топик, отказ в доступе).
    ///
    /// Диапазон `2xxx..4xxx`, плюс `InvalidArgs` (1004).
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        if (2000..=4999).contains(&c) {
            return true;
        }
        matches!(self, Self::InvalidArgs)
    }

    /// Является ли код внутренней или инфраструктурной ошибкой.
    ///
    /// Диапазоны `1xxx` и `5xxx..7xxx`.
    pub fn is_server_error(&self) -> bool {
        let c = self.code();
        matches!(c, 1000..=1999 | 5000..=7999)
    }

    /// Ошибка публикации или доставки (диапазон 8xxx).
    pub fn is_delivery_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Internal | Self::PreconditionFailed | Self::DeclareFailed | Self::BindFailed
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::AlreadyExists | Self::ConsumerNotFound | Self::Cancelled => {
                LogLevel::Debug
            }
            Self::InvalidArgs
            | Self::InvalidData
            | Self::InvalidConfig
            | Self::TopicNotConfigured
            | Self::Disposed => LogLevel::Info,
            Self::RateLimited
            | Self::Timeout
            | Self::ConnectionClosed
            | Self::ChannelClosed
            | Self::DeserializationFailed
            | Self::HandlerFailed => LogLevel::Warn,
            Self::Internal
            | Self::ConnectionFailed
            | Self::AuthFailed
            | Self::PreconditionFailed
            | Self::DeclareFailed
            | Self::BindFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // Если включён feature "strum", используем human-readable имя (AsRefStr).
        // Иначе Debug-имя.
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::ConnectionFailed.is_retryable());
        assert!(StatusCode::ChannelClosed.is_retryable());
        assert!(!StatusCode::TopicNotConfigured.is_retryable());
        assert!(!StatusCode::PreconditionFailed.is_retryable());
    }

    /// Тест проверяет разделение клиентских и серверных ошибок.
    #[test]
    fn test_client_vs_server() {
        assert!(StatusCode::InvalidArgs.is_client_error());
        assert!(StatusCode::TopicNotConfigured.is_client_error());
        assert!(StatusCode::AuthFailed.is_client_error());
        assert!(StatusCode::Internal.is_server_error());
        assert!(StatusCode::ConnectionFailed.is_server_error());
        assert!(!StatusCode::HandlerFailed.is_server_error());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>` и вспомогательную
    /// `from_u32`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::QueueNotFound.code();
        assert_eq!(StatusCode::try_from(n).unwrap(), StatusCode::QueueNotFound);
        assert!(StatusCode::from_u32(99999).is_none());
    }

    /// Тест проверяет получение числового представления и конвертацию
    /// `From<StatusCode> for u32`.
    #[test]
    fn test_code_and_into() {
        let c = StatusCode::TopicNotConfigured;
        assert_eq!(c.code(), 2004);
        let n: u32 = c.into();
        assert_eq!(n, 2004);
        assert!(StatusCode::is_success(StatusCode::Success.code()));
        assert!(!StatusCode::is_success(StatusCode::NotFound.code()));
    }

    /// Тест проверяет определение ошибок доставки (диапазон 8xxx).
    #[test]
    fn test_is_delivery_error() {
        assert!(StatusCode::HandlerFailed.is_delivery_error());
        assert!(StatusCode::PublishFailed.is_delivery_error());
        assert!(!StatusCode::ChannelClosed.is_delivery_error());
    }

    /// Тест проверяет, что критические ошибки помечаются корректно.
    #[test]
    fn test_is_critical() {
        assert!(StatusCode::Internal.is_critical());
        assert!(StatusCode::PreconditionFailed.is_critical());
        assert!(!StatusCode::NotFound.is_critical());
    }

    /// Тест проверяет отображаемый уровень логирования для разных кодов.
    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::Cancelled.log_level(), LogLevel::Debug);
        assert_eq!(StatusCode::HandlerFailed.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::ConnectionFailed.log_level(), LogLevel::Error);
    }

    /// Тест проверяет формат `Display`: строка должна содержать имя варианта и
    /// числовой код.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::ChannelClosed);
        assert!(
            s.contains("6006"),
            "Display must contain code 6006, got: {s}"
        );
        assert!(
            s.contains("ChannelClosed"),
            "Display must contain variant name 'ChannelClosed', got: {s}"
        );
    }

    /// Тест проверяет, что код сериализуется числом.
    #[cfg(feature = "serde_repr")]
    #[test]
    fn test_serde_repr_numeric() {
        let json = serde_json::to_string(&StatusCode::TopicNotConfigured).unwrap();
        assert_eq!(json, "2004");
        let back: StatusCode = serde_json::from_str("6004").unwrap();
        assert_eq!(back, StatusCode::Timeout);
    }
}
