use std::{any::Any, error::Error, fmt};

use crate::StatusCode;

/// Общий интерфейс всех ошибок ядра обмена сообщениями.
///
/// Каждая ошибка сообщает свой [`StatusCode`] и, если может, объект брокера,
/// к которому относится сбой. Трейт object-safe: `StackError` хранит его как
/// `dyn ErrorExt`.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Нужен для `StackError::downcast_ref`.
    fn as_any(&self) -> &dyn Any;

    /// Сообщение, которое можно отдать наружу.
    ///
    /// Внутренние ошибки скрываются за `"Internal messaging error"`: их текст
    /// может содержать адрес брокера или учётную запись.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal messaging error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Объект брокера, на котором произошёл сбой.
    fn resource(&self) -> Option<Resource<'_>> {
        None
    }
}

/// Объект брокера, к которому относится ошибка.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource<'a> {
    /// Адрес брокера
    Broker(&'a str),
    VirtualHost(&'a str),
    Channel(u64),
    Exchange(&'a str),
    Queue(&'a str),
    /// Логический топик (имя exchange в реестре)
    Topic(&'a str),
}

impl fmt::Display for Resource<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Broker(address) => write!(f, "broker {address}"),
            Self::VirtualHost(vhost) => write!(f, "vhost '{vhost}'"),
            Self::Channel(id) => write!(f, "channel {id}"),
            Self::Exchange(name) => write!(f, "exchange '{name}'"),
            Self::Queue(name) => write!(f, "queue '{name}'"),
            Self::Topic(name) => write!(f, "topic '{name}'"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct BrokerCrashed;

    impl fmt::Display for BrokerCrashed {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "broker at amqp://guest@10.0.0.1 crashed")
        }
    }

    impl Error for BrokerCrashed {}

    impl ErrorExt for BrokerCrashed {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct MissingQueue(&'static str);

    impl fmt::Display for MissingQueue {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "queue '{}' is not declared", self.0)
        }
    }

    impl Error for MissingQueue {}

    impl ErrorExt for MissingQueue {
        fn status_code(&self) -> StatusCode {
            StatusCode::QueueNotFound
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn resource(&self) -> Option<Resource<'_>> {
            Some(Resource::Queue(self.0))
        }
    }

    /// Тест проверяет, что ошибка без своего кода считается внутренней и
    /// не раскрывает адрес брокера.
    #[test]
    fn test_internal_error_is_hidden() {
        let err = BrokerCrashed;
        assert_eq!(err.status_code(), StatusCode::Internal);
        assert_eq!(err.client_message(), "Internal messaging error");
        assert_eq!(err.resource(), None);
    }

    /// Тест проверяет, что клиентская ошибка отдаётся как есть и указывает
    /// на очередь.
    #[test]
    fn test_client_error_names_resource() {
        let err = MissingQueue("orders.created");
        assert_eq!(err.client_message(), err.to_string());
        assert_eq!(err.resource(), Some(Resource::Queue("orders.created")));
        assert_eq!(
            err.resource().map(|r| r.to_string()).as_deref(),
            Some("queue 'orders.created'")
        );
    }

    #[test]
    fn test_resource_display() {
        assert_eq!(Resource::Channel(7).to_string(), "channel 7");
        assert_eq!(Resource::Topic("audit").to_string(), "topic 'audit'");
        assert_eq!(
            Resource::Broker("localhost:5672").to_string(),
            "broker localhost:5672"
        );
    }
}
