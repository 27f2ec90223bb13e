use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
};

use courier_error::{CourierResult, TopologyError};
use serde::{Deserialize, Serialize};

use crate::transport::FieldTable;

/// Тип exchange: определяет, как routing key сопоставляется с привязками.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Точное совпадение routing key
    #[default]
    Direct,
    /// Шаблоны из слов через `.`: `*` одно слово, `#` ноль и более
    Topic,
    /// Во все привязанные очереди
    Fanout,
    /// По заголовкам сообщения (`x-match` = `all` | `any`)
    Headers,
}

/// Объявление exchange вместе с дочерними очередями.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ExchangeKind,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: FieldTable,
    /// Routing key по умолчанию для публикаций в этот exchange.
    #[serde(default)]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub queues: Vec<QueueConfig>,
}

/// Объявление очереди и её привязки к родительскому exchange.
///
/// Пустое имя просит брокер сгенерировать имя очереди.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: FieldTable,
    #[serde(default)]
    pub routing_key: String,
    /// Аргументы привязки (для headers exchange здесь лежат `x-match` и
    /// сопоставляемые заголовки).
    #[serde(default)]
    pub bindings: FieldTable,
}

/// Полная топология, объявляемая при старте.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ExchangeKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
            Self::Headers => "headers",
        }
    }

    /// Ключ привязки, под который попадает любое сообщение.
    ///
    /// Для direct такого ключа нет, используется пустой.
    pub const fn catch_all_key(&self) -> &'static str {
        match self {
            Self::Topic => "#",
            _ => "",
        }
    }
}

impl ExchangeConfig {
    pub fn new(
        name: impl Into<String>,
        kind: ExchangeKind,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: false,
            auto_delete: false,
            arguments: FieldTable::new(),
            routing_key: None,
            queues: Vec::new(),
        }
    }

    pub fn durable(
        mut self,
        durable: bool,
    ) -> Self {
        self.durable = durable;
        self
    }

    pub fn auto_delete(
        mut self,
        auto_delete: bool,
    ) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn with_argument(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn with_routing_key(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn with_queue(
        mut self,
        queue: QueueConfig,
    ) -> Self {
        self.queues.push(queue);
        self
    }

    /// Первая объявленная очередь: её использует подписчик, когда очередь
    /// не указана явно.
    pub fn default_queue(&self) -> Option<&QueueConfig> {
        self.queues.first()
    }

    /// Routing key для публикации без явного ключа.
    pub fn default_routing_key(&self) -> &str {
        self.routing_key
            .as_deref()
            .or_else(|| self.queues.first().map(|q| q.routing_key.as_str()))
            .unwrap_or("")
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Очередь с именем от брокера: эксклюзивная и удаляемая автоматически.
    pub fn server_named() -> Self {
        Self {
            exclusive: true,
            auto_delete: true,
            ..Default::default()
        }
    }

    pub fn durable(
        mut self,
        durable: bool,
    ) -> Self {
        self.durable = durable;
        self
    }

    pub fn exclusive(
        mut self,
        exclusive: bool,
    ) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn auto_delete(
        mut self,
        auto_delete: bool,
    ) -> Self {
        self.auto_delete = auto_delete;
        self
    }

    pub fn with_routing_key(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.routing_key = key.into();
        self
    }

    pub fn with_argument(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn with_binding_argument(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.bindings.insert(key.into(), value.into());
        self
    }

    pub fn is_server_named(&self) -> bool {
        self.name.is_empty()
    }

    fn same_declaration(
        &self,
        other: &QueueConfig,
    ) -> bool {
        self.durable == other.durable
            && self.exclusive == other.exclusive
            && self.auto_delete == other.auto_delete
            && self.arguments == other.arguments
    }
}

impl TopologyConfig {
    pub fn new(exchanges: Vec<ExchangeConfig>) -> Self {
        Self { exchanges }
    }

    pub fn exchange(
        &self,
        name: &str,
    ) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.name == name)
    }

    pub fn validate(&self) -> CourierResult<()> {
        validate_exchanges(&self.exchanges)
    }
}

/// Проверяет набор объявлений до любого обращения к брокеру.
///
/// Имена exchange непусты, уникальны и не используют зарезервированный
/// префикс `amq.`. У каждой очереди есть имя; очередь встречается в одном
/// exchange не более одного раза, а в разных exchange объявлена одинаково.
pub fn validate_exchanges(exchanges: &[ExchangeConfig]) -> CourierResult<()> {
    let mut exchange_names: HashSet<&str> = HashSet::with_capacity(exchanges.len());
    let mut queues: HashMap<&str, &QueueConfig> = HashMap::new();

    for exchange in exchanges {
        if exchange.name.trim().is_empty() {
            return Err(invalid("exchange name must not be empty".to_string()));
        }
        if exchange.name.starts_with("amq.") {
            return Err(invalid(format!(
                "exchange name '{}' uses the reserved 'amq.' prefix",
                exchange.name
            )));
        }
        if !exchange_names.insert(&exchange.name) {
            return Err(invalid(format!(
                "exchange '{}' is declared more than once",
                exchange.name
            )));
        }

        let mut local: HashSet<&str> = HashSet::new();
        for queue in &exchange.queues {
            // Каждое объявление без имени создало бы на брокере новую
            // очередь, которую никто не потребляет
            if queue.is_server_named() {
                return Err(invalid(format!(
                    "queue under exchange '{}' has no name; anonymous queues are created per subscription",
                    exchange.name
                )));
            }
            if !local.insert(&queue.name) {
                return Err(invalid(format!(
                    "queue '{}' is listed twice under exchange '{}'",
                    queue.name, exchange.name
                )));
            }
            match queues.get(queue.name.as_str()) {
                Some(prev) if !prev.same_declaration(queue) => {
                    return Err(invalid(format!(
                        "queue '{}' is declared with conflicting attributes",
                        queue.name
                    )));
                }
                Some(_) => {}
                None => {
                    queues.insert(&queue.name, queue);
                }
            }
        }
    }

    Ok(())
}

fn invalid(reason: String) -> courier_error::StackError {
    TopologyError::InvalidConfig { reason }.into()
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for ExchangeKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "topic" => Ok(Self::Topic),
            "fanout" => Ok(Self::Fanout),
            "headers" => Ok(Self::Headers),
            other => Err(TopologyError::InvalidConfig {
                reason: format!("unknown exchange type '{other}'"),
            }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use courier_error::StatusCode;

    use super::*;

    fn orders() -> ExchangeConfig {
        ExchangeConfig::new("orders", ExchangeKind::Topic)
            .durable(true)
            .with_queue(QueueConfig::new("orders.created").with_routing_key("order.created"))
    }

    /// Тест проверяет разбор топологии из JSON с полем `type`.
    #[test]
    fn test_deserialize_shape() {
        let json = serde_json::json!({
            "exchanges": [{
                "name": "orders",
                "type": "topic",
                "durable": true,
                "queues": [{ "name": "orders.created", "routing_key": "order.*" }]
            }]
        });
        let topology: TopologyConfig = serde_json::from_value(json).unwrap();
        let exchange = topology.exchange("orders").unwrap();
        assert_eq!(exchange.kind, ExchangeKind::Topic);
        assert!(exchange.durable);
        assert!(!exchange.auto_delete);
        assert_eq!(exchange.queues[0].routing_key, "order.*");
        assert!(topology.exchange("billing").is_none());
    }

    /// Тест проверяет порядок выбора routing key по умолчанию.
    #[test]
    fn test_default_routing_key() {
        assert_eq!(orders().default_routing_key(), "order.created");
        assert_eq!(
            orders().with_routing_key("order.any").default_routing_key(),
            "order.any"
        );
        assert_eq!(
            ExchangeConfig::new("audit", ExchangeKind::Fanout).default_routing_key(),
            ""
        );
    }

    #[test]
    fn test_validate_ok() {
        let topology = TopologyConfig::new(vec![
            orders(),
            ExchangeConfig::new("audit", ExchangeKind::Fanout),
        ]);
        assert!(topology.validate().is_ok());
    }

    /// Тест проверяет, что очередь без имени в топологии отклоняется.
    #[test]
    fn test_validate_rejects_unnamed_queue() {
        let audit =
            ExchangeConfig::new("audit", ExchangeKind::Fanout).with_queue(QueueConfig::server_named());
        let err = validate_exchanges(&[audit]).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConfig);
        assert!(err.to_string().contains("audit"));

        let blank = orders().with_queue(QueueConfig::new(""));
        assert!(validate_exchanges(&[blank]).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let err = validate_exchanges(&[orders(), orders()]).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConfig);
        assert!(err.to_string().contains("more than once"));

        let twice = orders().with_queue(QueueConfig::new("orders.created"));
        assert!(validate_exchanges(&[twice]).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_and_reserved_names() {
        assert!(validate_exchanges(&[ExchangeConfig::new(" ", ExchangeKind::Direct)]).is_err());
        assert!(
            validate_exchanges(&[ExchangeConfig::new("amq.direct", ExchangeKind::Direct)])
                .is_err()
        );
    }

    /// Тест проверяет, что одна очередь может быть привязана к двум exchange,
    /// только если объявлена одинаково.
    #[test]
    fn test_validate_shared_queue() {
        let shared = QueueConfig::new("audit.all").durable(true);
        let a = ExchangeConfig::new("a", ExchangeKind::Fanout).with_queue(shared.clone());
        let b = ExchangeConfig::new("b", ExchangeKind::Fanout).with_queue(shared.clone());
        assert!(validate_exchanges(&[a.clone(), b]).is_ok());

        let conflicting =
            ExchangeConfig::new("c", ExchangeKind::Fanout).with_queue(shared.durable(false));
        assert!(validate_exchanges(&[a, conflicting]).is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Headers".parse::<ExchangeKind>().unwrap(), ExchangeKind::Headers);
        assert!("x-delayed".parse::<ExchangeKind>().is_err());
        assert_eq!(ExchangeKind::Topic.catch_all_key(), "#");
        assert_eq!(ExchangeKind::Direct.to_string(), "direct");
    }
}
