use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use bytes::Bytes;
use courier_error::{CourierResult, TopologyError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{
    connection::{ConnectionState, MemoryConnector},
    exchange::{Binding, Exchange},
    queue::{Queue, QueuedMessage},
};
use crate::{
    topology::{ExchangeConfig, QueueConfig},
    transport::{FieldTable, PublishProperties},
};

pub const DEFAULT_VHOST: &str = "/";
pub const DEFAULT_USER: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";

/// Встроенный брокер с семантикой маршрутизации AMQP 0-9-1.
///
/// Клонируется дёшево: все клоны разделяют одно состояние. Методы
/// инспекции (`has_exchange`, `message_count` и т.п.) работают с
/// виртуальным хостом по умолчанию `/`.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

pub(crate) struct BrokerState {
    vhosts: DashMap<String, Arc<VirtualHost>>,
    users: DashMap<String, String>,
    reachable: AtomicBool,
    connect_delay: Mutex<Duration>,
    connections: DashMap<u64, Weak<ConnectionState>>,
    next_id: AtomicU64,
    pub counters: Arc<BrokerCounters>,
}

/// Изолированное пространство exchange и очередей.
pub(crate) struct VirtualHost {
    pub name: String,
    exchanges: RwLock<HashMap<String, Exchange>>,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    counters: Arc<BrokerCounters>,
}

/// Счётчики брокера (накопительные, кроме `open_*`).
#[derive(Debug, Default)]
pub(crate) struct BrokerCounters {
    pub connection_attempts: AtomicU64,
    pub open_connections: AtomicU64,
    pub open_channels: AtomicU64,
    pub channels_opened: AtomicU64,
    pub exchange_declares: AtomicU64,
    pub queue_declares: AtomicU64,
    pub bindings_created: AtomicU64,
    pub published: AtomicU64,
    pub routed: AtomicU64,
    pub unroutable: AtomicU64,
    pub delivered: AtomicU64,
    pub acked: AtomicU64,
    pub rejected: AtomicU64,
    pub requeued: AtomicU64,
    pub consumers_cancelled: AtomicU64,
}

/// Снимок статистики брокера.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connection_attempts: u64,
    pub open_connections: u64,
    pub open_channels: u64,
    pub channels_opened: u64,
    pub exchange_declares: u64,
    pub queue_declares: u64,
    pub bindings_created: u64,
    pub published: u64,
    pub routed: u64,
    pub unroutable: u64,
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub consumers_cancelled: u64,
}

////////////////////////////////////////////////////////////////////////////////
// MemoryBroker
////////////////////////////////////////////////////////////////////////////////

impl MemoryBroker {
    /// Брокер с виртуальным хостом `/` и пользователем `guest`/`guest`.
    pub fn new() -> Self {
        let counters = Arc::new(BrokerCounters::default());
        let state = BrokerState {
            vhosts: DashMap::new(),
            users: DashMap::new(),
            reachable: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            counters,
        };
        let broker = Self {
            state: Arc::new(state),
        };
        broker.add_vhost(DEFAULT_VHOST);
        broker.add_user(DEFAULT_USER, DEFAULT_PASSWORD);
        broker
    }

    /// Коннектор, через который ядро подключается к этому брокеру.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector::new(self.clone())
    }

    pub fn add_vhost(
        &self,
        name: &str,
    ) {
        let counters = Arc::clone(&self.state.counters);
        self.state
            .vhosts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(VirtualHost::new(name, counters)));
    }

    pub fn add_user(
        &self,
        username: &str,
        password: &str,
    ) {
        self.state
            .users
            .insert(username.to_string(), password.to_string());
    }

    /// Имитирует недоступность брокера для новых подключений.
    pub fn set_reachable(
        &self,
        reachable: bool,
    ) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.state.reachable.load(Ordering::SeqCst)
    }

    /// Задержка перед ответом на подключение.
    pub fn set_connect_delay(
        &self,
        delay: Duration,
    ) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Обрывает все открытые соединения, как при сбое сети. Возвращает
    /// число закрытых соединений.
    pub fn drop_connections(&self) -> usize {
        let live: Vec<Arc<ConnectionState>> = self
            .state
            .connections
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        let mut dropped = 0;
        for connection in live {
            if connection.shutdown(Some("connection forced by broker")) {
                dropped += 1;
            }
        }
        debug!(dropped, "Broker dropped all connections");
        dropped
    }

    pub fn stats(&self) -> BrokerStats {
        self.state.counters.snapshot()
    }

    pub fn has_exchange(
        &self,
        name: &str,
    ) -> bool {
        self.default_vhost()
            .is_some_and(|v| v.exchanges.read().contains_key(name))
    }

    pub fn has_queue(
        &self,
        name: &str,
    ) -> bool {
        self.default_vhost()
            .is_some_and(|v| v.queues.read().contains_key(name))
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .default_vhost()
            .map(|v| v.queues.read().keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn binding_count(
        &self,
        exchange: &str,
    ) -> usize {
        self.default_vhost()
            .and_then(|v| v.exchanges.read().get(exchange).map(|x| x.bindings().len()))
            .unwrap_or(0)
    }

    /// Число сообщений, ожидающих доставки в очереди.
    pub fn message_count(
        &self,
        queue: &str,
    ) -> usize {
        self.default_vhost()
            .and_then(|v| v.queue(queue))
            .map(|q| q.message_count())
            .unwrap_or(0)
    }

    pub fn consumer_count(
        &self,
        queue: &str,
    ) -> usize {
        self.default_vhost()
            .and_then(|v| v.queue(queue))
            .map(|q| q.consumer_count())
            .unwrap_or(0)
    }

    /// Публикует сырые байты в обход ядра (для проверки устойчивости
    /// подписчиков к чужим сообщениям). Возвращает число очередей, в которые
    /// попало сообщение.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Bytes>,
    ) -> CourierResult<usize> {
        let vhost = self
            .default_vhost()
            .ok_or_else(|| TopologyError::ExchangeNotFound {
                exchange: exchange.to_string(),
            })?;
        vhost.publish(
            exchange,
            routing_key,
            payload.into(),
            PublishProperties::default(),
        )
    }

    fn default_vhost(&self) -> Option<Arc<VirtualHost>> {
        self.state.vhost(DEFAULT_VHOST)
    }

    pub(crate) fn state(&self) -> &Arc<BrokerState> {
        &self.state
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// BrokerState
////////////////////////////////////////////////////////////////////////////////

impl BrokerState {
    pub fn vhost(
        &self,
        name: &str,
    ) -> Option<Arc<VirtualHost>> {
        self.vhosts.get(name).map(|v| Arc::clone(v.value()))
    }

    pub fn check_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> bool {
        self.users
            .get(username)
            .is_some_and(|stored| stored.value() == password)
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    pub fn connect_delay(&self) -> Duration {
        *self.connect_delay.lock()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_connection(
        &self,
        connection: &Arc<ConnectionState>,
    ) {
        self.connections
            .insert(connection.id, Arc::downgrade(connection));
        self.counters
            .open_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn unregister_connection(
        &self,
        id: u64,
    ) {
        if self.connections.remove(&id).is_some() {
            self.counters
                .open_connections
                .fetch_sub(1, Ordering::Relaxed);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// VirtualHost
////////////////////////////////////////////////////////////////////////////////

impl VirtualHost {
    fn new(
        name: &str,
        counters: Arc<BrokerCounters>,
    ) -> Self {
        Self {
            name: name.to_string(),
            exchanges: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            counters,
        }
    }

    pub fn queue(
        &self,
        name: &str,
    ) -> Option<Arc<Queue>> {
        self.queues.read().get(name).cloned()
    }

    /// Очередь, доступная соединению `connection_id`.
    pub fn queue_for(
        &self,
        name: &str,
        connection_id: u64,
    ) -> CourierResult<Arc<Queue>> {
        let queue = self
            .queue(name)
            .ok_or_else(|| TopologyError::QueueNotFound {
                queue: name.to_string(),
            })?;
        if !queue.accessible_by(connection_id) {
            return Err(TopologyError::ResourceLocked {
                queue: name.to_string(),
            }
            .into());
        }
        Ok(queue)
    }

    /// Объявляет exchange. Повторное объявление с теми же атрибутами ничего
    /// не делает.
    pub fn declare_exchange(
        &self,
        config: &ExchangeConfig,
    ) -> CourierResult<bool> {
        self.counters
            .exchange_declares
            .fetch_add(1, Ordering::Relaxed);

        let mut exchanges = self.exchanges.write();
        if let Some(existing) = exchanges.get(&config.name) {
            return match existing.mismatch(config) {
                Some(reason) => Err(TopologyError::PreconditionFailed {
                    entity: "exchange",
                    name: config.name.clone(),
                    reason,
                }
                .into()),
                None => Ok(false),
            };
        }
        exchanges.insert(config.name.clone(), Exchange::from_config(config));
        Ok(true)
    }

    /// Объявляет очередь и возвращает её имя.
    pub fn declare_queue(
        &self,
        config: &QueueConfig,
        connection_id: u64,
    ) -> CourierResult<String> {
        self.counters.queue_declares.fetch_add(1, Ordering::Relaxed);

        let name = if config.is_server_named() {
            format!("amq.gen-{}", uuid::Uuid::new_v4().simple())
        } else {
            config.name.clone()
        };

        let mut queues = self.queues.write();
        if let Some(existing) = queues.get(&name) {
            if !existing.accessible_by(connection_id) {
                return Err(TopologyError::ResourceLocked { queue: name }.into());
            }
            return match existing.mismatch(config) {
                Some(reason) => Err(TopologyError::PreconditionFailed {
                    entity: "queue",
                    name,
                    reason,
                }
                .into()),
                None => Ok(name),
            };
        }

        let queue = Queue::new(
            name.clone(),
            config,
            Some(connection_id),
            Arc::clone(&self.counters),
        );
        queues.insert(name.clone(), Arc::new(queue));
        Ok(name)
    }

    pub fn bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
        connection_id: u64,
    ) -> CourierResult<()> {
        self.queue_for(queue, connection_id)?;

        let mut exchanges = self.exchanges.write();
        let target = exchanges
            .get_mut(exchange)
            .ok_or_else(|| TopologyError::ExchangeNotFound {
                exchange: exchange.to_string(),
            })?;
        let created = target.bind(Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
            arguments: arguments.clone(),
        });
        if created {
            self.counters
                .bindings_created
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Маршрутизирует сообщение. Пустое имя exchange означает exchange по
    /// умолчанию: доставка в очередь с именем, равным routing key.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: PublishProperties,
    ) -> CourierResult<usize> {
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let targets = if exchange.is_empty() {
            vec![routing_key.to_string()]
        } else {
            let exchanges = self.exchanges.read();
            let found = exchanges
                .get(exchange)
                .ok_or_else(|| TopologyError::ExchangeNotFound {
                    exchange: exchange.to_string(),
                })?;
            found.route(routing_key, &properties.headers)
        };

        let queues: Vec<Arc<Queue>> = {
            let map = self.queues.read();
            targets.iter().filter_map(|n| map.get(n).cloned()).collect()
        };

        if queues.is_empty() {
            self.counters.unroutable.fetch_add(1, Ordering::Relaxed);
            return Ok(0);
        }

        for queue in &queues {
            queue.enqueue(QueuedMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.clone(),
                properties: properties.clone(),
                redelivered: false,
            });
        }
        self.counters
            .routed
            .fetch_add(queues.len() as u64, Ordering::Relaxed);
        Ok(queues.len())
    }

    /// Удаляет очередь вместе с её привязками. Auto-delete exchange без
    /// оставшихся привязок удаляются следом.
    pub fn delete_queue(
        &self,
        name: &str,
    ) {
        let removed = self.queues.write().remove(name);
        let Some(queue) = removed else {
            return;
        };
        queue.mark_deleted();

        let mut exchanges = self.exchanges.write();
        for exchange in exchanges.values_mut() {
            exchange.unbind_queue(name);
        }
        exchanges.retain(|_, exchange| !exchange.is_unused());
        debug!(vhost = %self.name, queue = name, "Queue deleted");
    }

    /// Удаляет эксклюзивные очереди закрытого соединения.
    pub fn delete_exclusive_queues(
        &self,
        connection_id: u64,
    ) {
        let owned: Vec<String> = self
            .queues
            .read()
            .values()
            .filter(|q| q.owner == Some(connection_id))
            .map(|q| q.name.clone())
            .collect();
        for name in owned {
            self.delete_queue(&name);
        }
    }
}

impl BrokerCounters {
    pub fn snapshot(&self) -> BrokerStats {
        BrokerStats {
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            open_connections: self.open_connections.load(Ordering::Relaxed),
            open_channels: self.open_channels.load(Ordering::Relaxed),
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            exchange_declares: self.exchange_declares.load(Ordering::Relaxed),
            queue_declares: self.queue_declares.load(Ordering::Relaxed),
            bindings_created: self.bindings_created.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            consumers_cancelled: self.consumers_cancelled.load(Ordering::Relaxed),
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
    use crate::topology::ExchangeKind;

    fn vhost() -> VirtualHost {
        VirtualHost::new("/", Arc::new(BrokerCounters::default()))
    }

    #[test]
    fn test_defaults() {
        let broker = MemoryBroker::new();
        assert!(broker.is_reachable());
        assert!(broker.state().check_credentials("guest", "guest"));
        assert!(!broker.state().check_credentials("guest", "wrong"));
        assert!(broker.state().vhost("/").is_some());
        assert!(broker.state().vhost("/staging").is_none());
        assert_eq!(broker.stats(), BrokerStats::default());
    }

    /// Тест проверяет идемпотентность объявления и отказ при расхождении.
    #[test]
    fn test_declare_exchange_idempotent() {
        let v = vhost();
        let cfg = ExchangeConfig::new("orders", ExchangeKind::Topic).durable(true);
        assert!(v.declare_exchange(&cfg).unwrap());
        assert!(!v.declare_exchange(&cfg).unwrap());

        let err = v
            .declare_exchange(&ExchangeConfig::new("orders", ExchangeKind::Direct))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PreconditionFailed);
    }

    #[test]
    fn test_server_named_queue() {
        let v = vhost();
        let a = v.declare_queue(&QueueConfig::server_named(), 1).unwrap();
        let b = v.declare_queue(&QueueConfig::server_named(), 1).unwrap();
        assert!(a.starts_with("amq.gen-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_exclusive_queue_is_locked_for_others() {
        let v = vhost();
        let cfg = QueueConfig::new("private").exclusive(true);
        v.declare_queue(&cfg, 1).unwrap();
        assert_eq!(
            v.declare_queue(&cfg, 2).unwrap_err().status_code(),
            StatusCode::ResourceLocked
        );
        assert!(v.queue_for("private", 1).is_ok());

        v.delete_exclusive_queues(1);
        assert!(v.queue("private").is_none());
    }

    #[test]
    fn test_publish_routes_and_counts() {
        let v = vhost();
        v.declare_exchange(&ExchangeConfig::new("orders", ExchangeKind::Direct))
            .unwrap();
        v.declare_queue(&QueueConfig::new("created"), 1).unwrap();
        v.bind("created", "orders", "order.created", &FieldTable::new(), 1)
            .unwrap();

        let routed = v
            .publish(
                "orders",
                "order.created",
                Bytes::from_static(b"{}"),
                PublishProperties::default(),
            )
            .unwrap();
        assert_eq!(routed, 1);
        assert_eq!(v.queue("created").unwrap().message_count(), 1);

        let none = v
            .publish("orders", "order.deleted", Bytes::new(), PublishProperties::default())
            .unwrap();
        assert_eq!(none, 0);

        let missing = v.publish("billing", "", Bytes::new(), PublishProperties::default());
        assert_eq!(
            missing.unwrap_err().status_code(),
            StatusCode::ExchangeNotFound
        );

        let snapshot = v.counters.snapshot();
        assert_eq!(snapshot.published, 3);
        assert_eq!(snapshot.routed, 1);
        assert_eq!(snapshot.unroutable, 1);
    }

    #[test]
    fn test_default_exchange_routes_by_queue_name() {
        let v = vhost();
        v.declare_queue(&QueueConfig::new("jobs"), 1).unwrap();
        let routed = v
            .publish("", "jobs", Bytes::from_static(b"1"), PublishProperties::default())
            .unwrap();
        assert_eq!(routed, 1);
    }

    #[test]
    fn test_bind_requires_both_ends() {
        let v = vhost();
        v.declare_queue(&QueueConfig::new("q"), 1).unwrap();
        let err = v
            .bind("q", "missing", "", &FieldTable::new(), 1)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ExchangeNotFound);

        v.declare_exchange(&ExchangeConfig::new("x", ExchangeKind::Fanout))
            .unwrap();
        let err = v
            .bind("nope", "x", "", &FieldTable::new(), 1)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::QueueNotFound);
    }

    #[test]
    fn test_delete_queue_removes_auto_delete_exchange() {
        let v = vhost();
        v.declare_exchange(&ExchangeConfig::new("tmp", ExchangeKind::Fanout).auto_delete(true))
            .unwrap();
        v.declare_queue(&QueueConfig::new("q"), 1).unwrap();
        v.bind("q", "tmp", "", &FieldTable::new(), 1).unwrap();

        v.delete_queue("q");
        assert!(v.queue("q").is_none());
        assert!(!v.exchanges.read().contains_key("tmp"));
    }
}
