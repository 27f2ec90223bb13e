use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use courier_error::{ChannelError, ConnectionError, CourierResult, GenericError, StatusCode};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{
    broker::{BrokerState, MemoryBroker, VirtualHost},
    queue::{Queue, QueuedMessage},
};
use crate::{
    config::BrokerSettings,
    topology::{ExchangeConfig, QueueConfig},
    transport::{
        BrokerChannel, BrokerConnection, Connector, Consumer, FieldTable, PublishProperties,
    },
};

/// Максимум одновременно открытых каналов на соединение.
pub const CHANNEL_MAX: usize = 2047;

/// Коннектор к встроенному брокеру.
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

pub(crate) struct ConnectionState {
    pub id: u64,
    pub name: Option<String>,
    vhost: Arc<VirtualHost>,
    broker: Arc<BrokerState>,
    open: AtomicBool,
    channels: Mutex<HashMap<u64, Arc<ChannelState>>>,
}

/// Соединение со встроенным брокером.
pub struct MemoryConnection {
    state: Arc<ConnectionState>,
}

pub(crate) struct ChannelState {
    id: u64,
    connection_id: u64,
    vhost: Arc<VirtualHost>,
    broker: Arc<BrokerState>,
    open: AtomicBool,
    next_delivery_tag: AtomicU64,
    unacked: Mutex<BTreeMap<u64, Unacked>>,
    consumers: Mutex<HashMap<String, Arc<Queue>>>,
}

struct Unacked {
    queue: Arc<Queue>,
    message: QueuedMessage,
}

/// Канал встроенного брокера.
pub struct MemoryChannel {
    state: Arc<ChannelState>,
}

////////////////////////////////////////////////////////////////////////////////
// MemoryConnector
////////////////////////////////////////////////////////////////////////////////

impl MemoryConnector {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        settings: &BrokerSettings,
    ) -> CourierResult<Arc<dyn BrokerConnection>> {
        let broker = Arc::clone(self.broker.state());
        broker
            .counters
            .connection_attempts
            .fetch_add(1, Ordering::Relaxed);

        let delay = broker.connect_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !broker.is_reachable() {
            return Err(ConnectionError::Unreachable {
                address: settings.address(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        if !broker.check_credentials(&settings.username, &settings.password) {
            return Err(ConnectionError::AuthenticationFailed {
                username: settings.username.clone(),
            }
            .into());
        }
        let vhost = broker
            .vhost(&settings.virtual_host)
            .ok_or_else(|| ConnectionError::VirtualHostNotFound {
                vhost: settings.virtual_host.clone(),
            })?;

        let state = Arc::new(ConnectionState {
            id: broker.next_id(),
            name: settings.connection_name.clone(),
            vhost,
            broker: Arc::clone(&broker),
            open: AtomicBool::new(true),
            channels: Mutex::new(HashMap::new()),
        });
        broker.register_connection(&state);
        debug!(
            connection_id = state.id,
            vhost = %settings.virtual_host,
            name = ?state.name,
            "Memory broker connection opened"
        );

        Ok(Arc::new(MemoryConnection { state }))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Connection
////////////////////////////////////////////////////////////////////////////////

impl ConnectionState {
    /// Закрывает соединение. `false`, если оно уже было закрыто.
    pub fn shutdown(
        &self,
        reason: Option<&str>,
    ) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        let channels: Vec<Arc<ChannelState>> =
            self.channels.lock().drain().map(|(_, ch)| ch).collect();
        for channel in channels {
            channel.shutdown();
        }
        self.vhost.delete_exclusive_queues(self.id);
        self.broker.unregister_connection(self.id);
        debug!(connection_id = self.id, reason, "Memory broker connection closed");
        true
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn id(&self) -> u64 {
        self.state.id
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    async fn create_channel(&self) -> CourierResult<Arc<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(ChannelError::ConnectionNotOpen.into());
        }

        let mut channels = self.state.channels.lock();
        channels.retain(|_, ch| ch.is_open());
        if channels.len() >= CHANNEL_MAX {
            return Err(ChannelError::LimitExceeded { limit: CHANNEL_MAX }.into());
        }

        let broker = &self.state.broker;
        let channel = Arc::new(ChannelState {
            id: broker.next_id(),
            connection_id: self.state.id,
            vhost: Arc::clone(&self.state.vhost),
            broker: Arc::clone(broker),
            open: AtomicBool::new(true),
            next_delivery_tag: AtomicU64::new(1),
            unacked: Mutex::new(BTreeMap::new()),
            consumers: Mutex::new(HashMap::new()),
        });
        channels.insert(channel.id, Arc::clone(&channel));

        broker.counters.open_channels.fetch_add(1, Ordering::Relaxed);
        broker
            .counters
            .channels_opened
            .fetch_add(1, Ordering::Relaxed);
        trace!(
            connection_id = self.state.id,
            channel_id = channel.id,
            "Memory broker channel opened"
        );

        Ok(Arc::new(MemoryChannel { state: channel }))
    }

    async fn close(&self) -> CourierResult<()> {
        self.state.shutdown(None);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Channel
////////////////////////////////////////////////////////////////////////////////

impl ChannelState {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Регистрирует неподтверждённую доставку и возвращает её тег.
    pub fn track(
        &self,
        queue: Arc<Queue>,
        message: QueuedMessage,
    ) -> u64 {
        let tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed);
        self.unacked.lock().insert(tag, Unacked { queue, message });
        tag
    }

    pub fn untrack(
        &self,
        delivery_tag: u64,
    ) {
        self.unacked.lock().remove(&delivery_tag);
    }

    /// Закрывает канал: отменяет потребителей и возвращает неподтверждённые
    /// сообщения в их очереди.
    pub fn shutdown(&self) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }

        let consumers: Vec<(String, Arc<Queue>)> = self.consumers.lock().drain().collect();
        for (tag, queue) in consumers {
            self.detach_consumer(&tag, &queue);
        }

        let pending = std::mem::take(&mut *self.unacked.lock());
        self.requeue(pending.into_values());

        self.broker
            .counters
            .open_channels
            .fetch_sub(1, Ordering::Relaxed);
        true
    }

    fn ensure_open(&self) -> CourierResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ChannelError::Closed {
                channel_id: self.id,
            }
            .into())
        }
    }

    fn detach_consumer(
        &self,
        tag: &str,
        queue: &Arc<Queue>,
    ) {
        self.broker
            .counters
            .consumers_cancelled
            .fetch_add(1, Ordering::Relaxed);
        if queue.remove_consumer(tag) {
            self.vhost.delete_queue(&queue.name);
        }
    }

    /// Возвращает сообщения в очереди, сохраняя порядок тегов внутри каждой.
    fn requeue(
        &self,
        entries: impl Iterator<Item = Unacked>,
    ) {
        let mut grouped: Vec<(Arc<Queue>, Vec<QueuedMessage>)> = Vec::new();
        for entry in entries {
            match grouped
                .iter_mut()
                .find(|(q, _)| Arc::ptr_eq(q, &entry.queue))
            {
                Some((_, batch)) => batch.push(entry.message),
                None => grouped.push((entry.queue, vec![entry.message])),
            }
        }
        for (queue, batch) in grouped {
            queue.requeue(batch);
        }
    }

    fn take_unacked(
        &self,
        delivery_tag: u64,
    ) -> CourierResult<Unacked> {
        self.unacked.lock().remove(&delivery_tag).ok_or_else(|| {
            GenericError::new(
                StatusCode::AckFailed,
                format!(
                    "unknown delivery tag {delivery_tag} on channel {}",
                    self.id
                ),
            )
            .into()
        })
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    fn id(&self) -> u64 {
        self.state.id
    }

    fn is_open(&self) -> bool {
        self.state.is_open()
    }

    async fn exchange_declare(
        &self,
        exchange: &ExchangeConfig,
    ) -> CourierResult<()> {
        self.state.ensure_open()?;
        self.state.vhost.declare_exchange(exchange)?;
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &QueueConfig,
    ) -> CourierResult<String> {
        self.state.ensure_open()?;
        self.state
            .vhost
            .declare_queue(queue, self.state.connection_id)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &FieldTable,
    ) -> CourierResult<()> {
        self.state.ensure_open()?;
        self.state.vhost.bind(
            queue,
            exchange,
            routing_key,
            arguments,
            self.state.connection_id,
        )
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: PublishProperties,
    ) -> CourierResult<()> {
        self.state.ensure_open()?;
        let routed = self
            .state
            .vhost
            .publish(exchange, routing_key, payload, properties)?;
        trace!(
            channel_id = self.state.id,
            exchange,
            routing_key,
            routed,
            "Memory broker publish"
        );
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: Option<&str>,
    ) -> CourierResult<Consumer> {
        self.state.ensure_open()?;
        let target = self
            .state
            .vhost
            .queue_for(queue, self.state.connection_id)?;

        let tag = match consumer_tag {
            Some(tag) if !tag.is_empty() => tag.to_string(),
            _ => format!("amq.ctag-{}", uuid::Uuid::new_v4().simple()),
        };

        {
            let mut consumers = self.state.consumers.lock();
            if consumers.contains_key(&tag) {
                return Err(GenericError::new(
                    StatusCode::AlreadyExists,
                    format!("consumer tag '{tag}' is already in use on this channel"),
                )
                .into());
            }
            consumers.insert(tag.clone(), Arc::clone(&target));
        }

        let (sender, deliveries) = mpsc::unbounded_channel();
        target.add_consumer(tag.clone(), Arc::clone(&self.state), sender);

        Ok(Consumer { tag, deliveries })
    }

    async fn basic_cancel(
        &self,
        consumer_tag: &str,
    ) -> CourierResult<bool> {
        self.state.ensure_open()?;
        let removed = self.state.consumers.lock().remove(consumer_tag);
        match removed {
            Some(queue) => {
                self.state.detach_consumer(consumer_tag, &queue);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn basic_ack(
        &self,
        delivery_tag: u64,
    ) -> CourierResult<()> {
        self.state.ensure_open()?;
        self.state.take_unacked(delivery_tag)?;
        self.state
            .broker
            .counters
            .acked
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn basic_nack(
        &self,
        delivery_tag: u64,
        requeue: bool,
    ) -> CourierResult<()> {
        self.state.ensure_open()?;
        let entry = self.state.take_unacked(delivery_tag)?;
        if requeue {
            entry.queue.requeue(vec![entry.message]);
        } else {
            self.state
                .broker
                .counters
                .rejected
                .fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn close(&self) -> CourierResult<()> {
        self.state.shutdown();
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
