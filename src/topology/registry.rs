use std::sync::Arc;

use courier_error::{CourierResult, TopicNotConfiguredError};
use dashmap::DashMap;

use super::ExchangeConfig;

/// Объявленные exchange, по одному на топик.
///
/// Заполняется при старте и читается издателем и подписчиком на каждом
/// вызове, поэтому чтение не блокирует другие топики.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: DashMap<Arc<str>, Arc<ExchangeConfig>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует exchange. Повторная регистрация заменяет прежнюю.
    pub fn register(
        &self,
        exchange: ExchangeConfig,
    ) {
        let key: Arc<str> = Arc::from(exchange.name.as_str());
        self.topics.insert(key, Arc::new(exchange));
    }

    pub fn get(
        &self,
        topic: &str,
    ) -> Option<Arc<ExchangeConfig>> {
        self.topics.get(topic).map(|e| Arc::clone(e.value()))
    }

    /// Как `get`, но отсутствие топика является ошибкой.
    pub fn require(
        &self,
        topic: &str,
    ) -> CourierResult<Arc<ExchangeConfig>> {
        self.get(topic)
            .ok_or_else(|| TopicNotConfiguredError::new(topic).into())
    }

    pub fn contains(
        &self,
        topic: &str,
    ) -> bool {
        self.topics.contains_key(topic)
    }

    /// Имена топиков в алфавитном порядке.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
