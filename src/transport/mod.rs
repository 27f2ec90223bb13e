//! Граница между ядром обмена сообщениями и брокером.
//!
//! Трейты повторяют набор операций AMQP 0-9-1, которым пользуется ядро:
//! объявление exchange и очередей, привязки, публикация, потребление,
//! подтверждения. Любой транспорт (сетевой клиент или встроенный брокер)
//! подключается реализацией этих трейтов.
//!
//! - `memory`: встроенный брокер с семантикой маршрутизации AMQP.

pub mod memory;

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use courier_error::CourierResult;
use tokio::sync::mpsc;

use crate::{
    config::BrokerSettings,
    topology::{ExchangeConfig, QueueConfig},
};

pub use memory::{BrokerStats, MemoryBroker, MemoryConnector};

/// Упорядоченная таблица аргументов и заголовков.
pub type FieldTable = BTreeMap<String, serde_json::Value>;

/// Режим хранения сообщения на брокере.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeliveryMode {
    #[default]
    Transient = 1,
    Persistent = 2,
}

/// Свойства сообщения, передаваемые вместе с телом.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishProperties {
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Unix-время публикации в секундах
    pub timestamp: Option<i64>,
    pub headers: FieldTable,
    pub delivery_mode: DeliveryMode,
}

/// Одна доставка от брокера потребителю.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Уникален в пределах канала
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub payload: Bytes,
    pub properties: PublishProperties,
}

/// Зарегистрированный потребитель и поток его доставок.
///
/// Поток завершается, когда потребитель отменён, канал закрыт или
/// соединение потеряно.
pub struct Consumer {
    pub tag: String,
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
}

/// Устанавливает соединения с брокером.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        settings: &BrokerSettings,
    ) -> CourierResult<Arc<dyn BrokerConnection>>;
}

/// Логическое соединение с брокером, поверх которого открываются каналы.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn id(&self) -> u64;

    fn is_open(&self) -> bool;

    async fn create_channel(&self) -> CourierResult<Arc<dyn BrokerChannel>>;

    /// Закрывает соединение вместе со всеми каналами. Повторный вызов ничего
    /// не делает.
    async fn close(&self) -> CourierResult<()>;
}

/// Канал: мультиплексированная сессия внутри соединения.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn id(&self) -> u64;

    fn is_open(&self) -> bool;

    async fn exchange_declare(
        &self,
        exchange: &ExchangeConfig,
    ) -> CourierResult<()>;

    /// Объявляет очередь и возвращает её имя (для пустого имени брокер
    /// генерирует своё).
    async fn queue_declare(
        &self,
        queue: &QueueConfig,
    ) -> CourierResult<String>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> CourierResult<()>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: PublishProperties,
    ) -> CourierResult<()>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: Option<&str>,
    ) -> CourierResult<Consumer>;

    /// Отменяет потребителя. `false`, если такого тега на канале нет.
    async fn basic_cancel(
        &self,
        consumer_tag: &str,
    ) -> CourierResult<bool>;

    async fn basic_ack(
        &self,
        delivery_tag: u64,
    ) -> CourierResult<()>;

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        requeue: bool,
    ) -> CourierResult<()>;

    async fn close(&self) -> CourierResult<()>;
}

impl fmt::Debug for Consumer {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Consumer").field("tag", &self.tag).finish()
    }
}

impl fmt::Debug for dyn BrokerConnection {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("id", &self.id())
            .field("open", &self.is_open())
            .finish()
    }
}

impl fmt::Debug for dyn BrokerChannel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("BrokerChannel")
            .field("id", &self.id())
            .field("open", &self.is_open())
            .finish()
    }
}
