//! Формат сообщения на проводе.
//!
//! ```json
//! { "Message": {...}, "MessageId": "..." | null,
//!   "CorrelationId": "..." | null, "PublishedAt": "2024-05-01T12:00:00Z" }
//! ```
//!
//! Имена полей и их регистр являются контрактом между издателями и
//! подписчиками и не меняются.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Сообщение пользователя вместе с метаданными доставки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope<T> {
    message: T,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    published_at: DateTime<Utc>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<T> Envelope<T> {
    /// Конверт с текущим временем и без идентификаторов.
    pub fn new(message: T) -> Self {
        Self {
            message,
            message_id: None,
            correlation_id: None,
            published_at: Utc::now(),
        }
    }

    pub fn with_message_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Присваивает случайный UUID v4, если идентификатор не задан.
    pub fn with_generated_id(mut self) -> Self {
        if self.message_id.is_none() {
            self.message_id = Some(Uuid::new_v4().to_string());
        }
        self
    }

    pub fn with_correlation_id(
        mut self,
        id: Option<String>,
    ) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn with_published_at(
        mut self,
        at: DateTime<Utc>,
    ) -> Self {
        self.published_at = at;
        self
    }

    pub fn message(&self) -> &T {
        &self.message
    }

    pub fn into_message(self) -> T {
        self.message
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Заменяет сообщение, сохраняя метаданные.
    pub fn map<U>(
        self,
        f: impl FnOnce(T) -> U,
    ) -> Envelope<U> {
        Envelope {
            message: f(self.message),
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            published_at: self.published_at,
        }
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

impl Envelope<Value> {
    /// `true`, если сообщение отсутствует (`null`).
    pub fn is_empty(&self) -> bool {
        self.message.is_null()
    }

    /// Типизирует сообщение.
    pub fn decode_message<T: DeserializeOwned>(self) -> Result<Envelope<T>, serde_json::Error> {
        let message = serde_json::from_value(self.message)?;
        Ok(Envelope {
            message,
            message_id: self.message_id,
            correlation_id: self.correlation_id,
            published_at: self.published_at,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
        sku: String,
    }

    /// Тест проверяет имена полей и формат времени на проводе.
    #[test]
    fn test_wire_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let envelope = Envelope::new(json!({"id": 1}))
            .with_message_id("m-1")
            .with_correlation_id(Some("corr-1".into()))
            .with_published_at(at);

        let value: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "Message": {"id": 1},
                "MessageId": "m-1",
                "CorrelationId": "corr-1",
                "PublishedAt": "2024-05-01T12:00:00Z"
            })
        );
    }

    #[test]
    fn test_absent_ids_are_null() {
        let envelope = Envelope::new(1u8);
        let value: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["MessageId"], Value::Null);
        assert_eq!(value["CorrelationId"], Value::Null);
    }

    /// Тест проверяет, что отсутствующие идентификаторы читаются как `None`.
    #[test]
    fn test_decode_missing_ids() {
        let raw = br#"{"Message":{"id":7,"sku":"A-1"},"PublishedAt":"2024-05-01T12:00:00+02:00"}"#;
        let envelope = Envelope::<OrderCreated>::decode(raw).unwrap();
        assert_eq!(envelope.message().id, 7);
        assert!(envelope.message_id().is_none());
        assert!(envelope.correlation_id().is_none());
        assert_eq!(
            envelope.published_at(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_round_trip_typed() {
        let original = Envelope::new(OrderCreated {
            id: 42,
            sku: "B-7".into(),
        })
        .with_generated_id()
        .with_correlation_id(Some("c".into()));

        let decoded = Envelope::<OrderCreated>::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_generated_id_keeps_existing() {
        let e = Envelope::new(()).with_message_id("fixed").with_generated_id();
        assert_eq!(e.message_id(), Some("fixed"));

        let e = Envelope::new(()).with_generated_id();
        assert!(Uuid::parse_str(e.message_id().unwrap()).is_ok());
    }

    #[test]
    fn test_null_message_and_typing() {
        let raw = br#"{"Message":null,"MessageId":null,"CorrelationId":null,"PublishedAt":"2024-05-01T12:00:00Z"}"#;
        let envelope = Envelope::<Value>::decode(raw).unwrap();
        assert!(envelope.is_empty());

        let raw = br#"{"Message":{"id":"x"},"PublishedAt":"2024-05-01T12:00:00Z"}"#;
        let envelope = Envelope::<Value>::decode(raw).unwrap();
        assert!(!envelope.is_empty());
        assert!(envelope.decode_message::<OrderCreated>().is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Envelope::<Value>::decode(b"not json").is_err());
        assert!(Envelope::<Value>::decode(br#"{"Message":1}"#).is_err());
    }
}
