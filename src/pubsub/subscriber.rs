use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use courier_error::{
    bail, CourierResult, EnvelopeDeserializationError, HandlerExecutionError,
    ObjectDisposedError, ResultExt, StackError, StatusCode, SubscribeError,
};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    cache::TopicCache,
    events::{DeliveryCounters, DeliveryEvent, DeliveryOutcome, DeliveryStats},
    handler::{handler_fn, DeliveryHandler, HandlerError, HandlerRegistry},
};
use crate::{
    connection::ChannelFactory,
    envelope::Envelope,
    topology::{ExchangeConfig, ExchangeKind, QueueConfig, TopicRegistry},
    transport::{BrokerChannel, Delivery, FieldTable},
};

/// Ёмкость буфера событий доставки.
const EVENT_CAPACITY: usize = 1024;

/// Параметры подписки.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberArgs {
    /// Очередь для потребления. Если не задана, используется первая очередь
    /// exchange, а при её отсутствии анонимная очередь.
    pub queue: Option<String>,
    /// Ключ привязки анонимной очереди
    pub routing_key: Option<String>,
    /// Тег потребителя; по умолчанию его назначает брокер
    pub consumer_tag: Option<String>,
}

/// Состояние подписки. `Cancelled` конечное.
///
/// Отменённая подписка одновременно удаляется из индекса, поэтому
/// `subscription()` и `subscriptions()` отдают только `Created` и `Active`.
/// `Cancelled` видно лишь в снимках, снятых задачей доставки, и в логах.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Active,
    Cancelled,
}

/// Снимок подписки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub queue: String,
    pub consumer_tag: String,
    pub state: SubscriptionState,
}

/// Подписывает обработчики на топики и доставляет им сообщения.
///
/// Каждая подписка обслуживается своей задачей: доставки одной подписки
/// обрабатываются последовательно, медленный обработчик задерживает только
/// свою подписку. Ошибки разбора и обработчика не останавливают подписку:
/// доставка подтверждается, а результат публикуется событием
/// [`DeliveryEvent`] и учитывается в [`DeliveryStats`].
pub struct Subscriber {
    factory: Arc<ChannelFactory>,
    registry: Arc<TopicRegistry>,
    channels: TopicCache,
    subscriptions: Arc<DashMap<String, Arc<SubscriptionEntry>>>,
    stats: Arc<DeliveryCounters>,
    events: broadcast::Sender<DeliveryEvent>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

struct SubscriptionEntry {
    topic: Arc<str>,
    queue: String,
    consumer_tag: String,
    channel: Arc<dyn BrokerChannel>,
    state: Mutex<SubscriptionState>,
    /// Останавливает задачу доставки
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Всё, что нужно задаче доставки помимо самой подписки.
#[derive(Clone)]
struct DeliveryContext {
    subscriptions: Arc<DashMap<String, Arc<SubscriptionEntry>>>,
    stats: Arc<DeliveryCounters>,
    events: broadcast::Sender<DeliveryEvent>,
    handler: Arc<dyn DeliveryHandler>,
    handler_token: CancellationToken,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SubscriberArgs {
    pub fn with_queue(
        mut self,
        queue: impl Into<String>,
    ) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_routing_key(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn with_consumer_tag(
        mut self,
        tag: impl Into<String>,
    ) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }
}

impl SubscriptionEntry {
    fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// `Created` → `Active`; из `Cancelled` возврата нет.
    fn activate(&self) {
        let mut state = self.state.lock();
        if *state == SubscriptionState::Created {
            *state = SubscriptionState::Active;
        }
    }

    fn cancel(&self) {
        *self.state.lock() = SubscriptionState::Cancelled;
    }

    fn snapshot(&self) -> Subscription {
        Subscription {
            topic: self.topic.to_string(),
            queue: self.queue.clone(),
            consumer_tag: self.consumer_tag.clone(),
            state: self.state(),
        }
    }
}

impl Subscriber {
    pub fn new(
        factory: Arc<ChannelFactory>,
        registry: Arc<TopicRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factory,
            registry,
            channels: TopicCache::new("Subscriber"),
            subscriptions: Arc::new(DashMap::new()),
            stats: Arc::new(DeliveryCounters::default()),
            events,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Подписывает типизированный обработчик. Возвращает тег потребителя,
    /// который служит дескриптором подписки.
    pub async fn subscribe<T, F, Fut>(
        &self,
        topic: &str,
        handler: F,
        args: SubscriberArgs,
        token: &CancellationToken,
    ) -> CourierResult<String>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Envelope<T>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_handler(topic, handler_fn(handler), args, token)
            .await
    }

    pub async fn subscribe_handler(
        &self,
        topic: &str,
        handler: Arc<dyn DeliveryHandler>,
        args: SubscriberArgs,
        token: &CancellationToken,
    ) -> CourierResult<String> {
        self.ensure_open()?;
        if token.is_cancelled() {
            return Err(cancelled(topic));
        }

        let exchange = self.registry.require(topic)?;

        let channel = self
            .channels
            .get_or_create(topic, || self.factory.open_channel(token))
            .await
            .with_context(|| format!("failed to open channel for topic '{topic}'"))?;

        let queue = self.resolve_queue(&*channel, &exchange, &args).await?;

        let consumer = channel
            .basic_consume(&queue, args.consumer_tag.as_deref())
            .await
            .map_err(|e| consume_failure(topic, &queue, &e))?;
        let tag = consumer.tag.clone();

        // Регистрация у брокера уже произошла: при отмене или закрытии её
        // нужно откатить, чтобы не оставить висящего потребителя
        if token.is_cancelled() || self.is_closed() {
            let _ = channel.basic_cancel(&tag).await;
            if self.is_closed() {
                return Err(ObjectDisposedError::new("Subscriber").into());
            }
            return Err(cancelled(topic));
        }

        let entry = Arc::new(SubscriptionEntry {
            topic: Arc::from(topic),
            queue: queue.clone(),
            consumer_tag: tag.clone(),
            channel: Arc::clone(&channel),
            state: Mutex::new(SubscriptionState::Created),
            stop: CancellationToken::new(),
            task: Mutex::new(None),
        });

        let duplicate = match self.subscriptions.entry(tag.clone()) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
                false
            }
        };
        if duplicate {
            let _ = channel.basic_cancel(&tag).await;
            bail!(
                StatusCode::AlreadyExists,
                "consumer tag '{}' is already in use",
                tag
            );
        }

        // close() мог обойти индекс до вставки
        if self.is_closed() {
            if self.subscriptions.remove(&tag).is_some() {
                let _ = channel.basic_cancel(&tag).await;
            }
            entry.cancel();
            return Err(ObjectDisposedError::new("Subscriber").into());
        }

        let ctx = DeliveryContext {
            subscriptions: Arc::clone(&self.subscriptions),
            stats: Arc::clone(&self.stats),
            events: self.events.clone(),
            handler,
            handler_token: self.shutdown.child_token(),
        };
        let task = tokio::spawn(run_deliveries(ctx, Arc::clone(&entry), consumer.deliveries));
        *entry.task.lock() = Some(task);
        entry.activate();

        info!(
            topic,
            queue = %queue,
            consumer_tag = %tag,
            channel_id = channel.id(),
            "Subscription registered"
        );
        Ok(tag)
    }

    /// Подписывает все обработчики реестра. Если одна из подписок не
    /// удалась, уже созданные отменяются.
    pub async fn subscribe_registry(
        &self,
        registry: &HandlerRegistry,
        token: &CancellationToken,
    ) -> CourierResult<Vec<String>> {
        let mut handles = Vec::with_capacity(registry.len());
        for registration in registry.iter() {
            let result = self
                .subscribe_handler(
                    &registration.topic,
                    Arc::clone(&registration.handler),
                    registration.args.clone(),
                    token,
                )
                .await;

            match result {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    let rollback = CancellationToken::new();
                    for handle in &handles {
                        let _ = self.unsubscribe(handle, &rollback).await;
                    }
                    return Err(e.context(format!(
                        "failed to subscribe handler for topic '{}'",
                        registration.topic
                    )));
                }
            }
        }
        Ok(handles)
    }

    /// Отменяет подписку. `false`, если такой подписки нет.
    ///
    /// После `true` дескриптор больше не виден в `subscription()`: запись
    /// переходит в `Cancelled` уже вне индекса.
    ///
    /// Обработчик, уже получивший доставку, дорабатывает; доставки,
    /// полученные но ещё не переданные обработчику, возвращаются в очередь.
    pub async fn unsubscribe(
        &self,
        handle: &str,
        token: &CancellationToken,
    ) -> CourierResult<bool> {
        self.ensure_open()?;
        if token.is_cancelled() {
            bail!(StatusCode::Cancelled, "unsubscribe of '{}' cancelled", handle);
        }

        let Some((_, entry)) = self.subscriptions.remove(handle) else {
            return Ok(false);
        };
        stop_subscription(&entry, token).await;

        info!(
            topic = %entry.topic,
            consumer_tag = %entry.consumer_tag,
            "Subscription cancelled"
        );
        Ok(true)
    }

    pub fn subscription(
        &self,
        handle: &str,
    ) -> Option<Subscription> {
        self.subscriptions.get(handle).map(|e| e.snapshot())
    }

    /// Активные подписки, упорядоченные по тегу.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut list: Vec<Subscription> =
            self.subscriptions.iter().map(|e| e.snapshot()).collect();
        list.sort_by(|a, b| a.consumer_tag.cmp(&b.consumer_tag));
        list
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot()
    }

    /// Поток событий доставки. Получатель видит только события, случившиеся
    /// после вызова.
    pub fn events(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    pub fn channels_created(&self) -> u64 {
        self.channels.created()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Отменяет все подписки и закрывает каналы. Токены, переданные
    /// обработчикам, отменяются.
    pub async fn close(&self) -> CourierResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();

        let handles: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        let token = CancellationToken::new();
        for handle in &handles {
            if let Some((_, entry)) = self.subscriptions.remove(handle) {
                stop_subscription(&entry, &token).await;
            }
        }

        let closed = self.channels.close_all().await;
        info!(
            subscriptions = handles.len(),
            channels = closed,
            "Subscriber closed"
        );
        Ok(())
    }

    async fn resolve_queue(
        &self,
        channel: &dyn BrokerChannel,
        exchange: &ExchangeConfig,
        args: &SubscriberArgs,
    ) -> CourierResult<String> {
        if let Some(queue) = &args.queue {
            return Ok(queue.clone());
        }
        if let Some(queue) = exchange.default_queue() {
            return Ok(queue.name.clone());
        }

        let topic = exchange.name.as_str();
        let queue = channel
            .queue_declare(&QueueConfig::server_named())
            .await
            .map_err(|e| consume_failure(topic, "", &e))?;

        let routing_key = args
            .routing_key
            .clone()
            .unwrap_or_else(|| anonymous_binding_key(exchange));
        channel
            .queue_bind(&queue, topic, &routing_key, &FieldTable::new())
            .await
            .map_err(|e| consume_failure(topic, &queue, &e))?;

        debug!(topic, queue = %queue, routing_key = %routing_key, "Anonymous queue bound");
        Ok(queue)
    }

    fn ensure_open(&self) -> CourierResult<()> {
        if self.is_closed() {
            return Err(ObjectDisposedError::new("Subscriber").into());
        }
        Ok(())
    }
}

/// Ключ привязки анонимной очереди: для topic всё (`#`), для direct ключ
/// публикации по умолчанию, для fanout и headers ключ не важен.
fn anonymous_binding_key(exchange: &ExchangeConfig) -> String {
    match exchange.kind {
        ExchangeKind::Direct => exchange.default_routing_key().to_string(),
        kind => kind.catch_all_key().to_string(),
    }
}

/// Останавливает подписку, уже удалённую из индекса.
async fn stop_subscription(
    entry: &SubscriptionEntry,
    token: &CancellationToken,
) {
    entry.stop.cancel();

    match entry.channel.basic_cancel(&entry.consumer_tag).await {
        Ok(true) => {}
        Ok(false) => debug!(consumer_tag = %entry.consumer_tag, "Consumer already gone"),
        Err(e) => debug!(consumer_tag = %entry.consumer_tag, error = %e, "Consumer cancel failed"),
    }

    let task = entry.task.lock().take();
    if let Some(task) = task {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = task => {}
        }
    }
    entry.cancel();
}

/// Задача доставки одной подписки.
async fn run_deliveries(
    ctx: DeliveryContext,
    entry: Arc<SubscriptionEntry>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = entry.stop.cancelled() => break,
            next = deliveries.recv() => match next {
                Some(delivery) => delivery,
                None => {
                    // Поток закрыт брокером: отмена потребителя, закрытие
                    // канала или потеря соединения
                    entry.cancel();
                    ctx.subscriptions
                        .remove_if(&entry.consumer_tag, |_, current| Arc::ptr_eq(current, &entry));
                    info!(
                        topic = %entry.topic,
                        consumer_tag = %entry.consumer_tag,
                        "Consumer stream ended"
                    );
                    return;
                }
            },
        };
        process_delivery(&ctx, &entry, delivery).await;
    }

    // Остановлено отпиской: уже полученное, но не обработанное возвращаем
    deliveries.close();
    while let Some(delivery) = deliveries.recv().await {
        match entry.channel.basic_nack(delivery.delivery_tag, true).await {
            Ok(()) => {
                ctx.stats.requeued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => debug!(
                consumer_tag = %entry.consumer_tag,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Requeue of buffered delivery failed"
            ),
        }
    }
}

async fn process_delivery(
    ctx: &DeliveryContext,
    entry: &SubscriptionEntry,
    delivery: Delivery,
) {
    ctx.stats.received.fetch_add(1, Ordering::Relaxed);
    let topic = &*entry.topic;
    let tag = entry.consumer_tag.as_str();

    let (outcome, message_id) = match Envelope::<Value>::decode(&delivery.payload) {
        Err(e) => {
            let err = EnvelopeDeserializationError::new(topic, e.to_string());
            warn!(
                topic,
                consumer_tag = tag,
                delivery_tag = delivery.delivery_tag,
                error = %err,
                "Dropping malformed delivery"
            );
            (DeliveryOutcome::DeserializationFailed(err), None)
        }
        Ok(envelope) if envelope.is_empty() => {
            warn!(
                topic,
                consumer_tag = tag,
                message_id = envelope.message_id().unwrap_or("-"),
                "Envelope without message, handler skipped"
            );
            (
                DeliveryOutcome::Skipped,
                envelope.message_id().map(str::to_owned),
            )
        }
        Ok(envelope) => {
            let message_id = envelope.message_id().map(str::to_owned);
            (invoke_handler(ctx, topic, tag, envelope).await, message_id)
        }
    };

    match entry.channel.basic_ack(delivery.delivery_tag).await {
        Ok(()) => {
            ctx.stats.acked.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            ctx.stats.ack_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                topic,
                consumer_tag = tag,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Ack failed"
            );
        }
    }

    ctx.stats.record(&outcome);
    let _ = ctx.events.send(DeliveryEvent {
        topic: Arc::clone(&entry.topic),
        consumer_tag: entry.consumer_tag.clone(),
        delivery_tag: delivery.delivery_tag,
        message_id,
        redelivered: delivery.redelivered,
        outcome,
    });
}

/// Запускает обработчик в отдельной задаче, чтобы паника не задела
/// задачу доставки.
async fn invoke_handler(
    ctx: &DeliveryContext,
    topic: &str,
    tag: &str,
    envelope: Envelope<Value>,
) -> DeliveryOutcome {
    let handler = Arc::clone(&ctx.handler);
    let token = ctx.handler_token.clone();
    let joined = tokio::spawn(async move { handler.handle(envelope, token).await }).await;

    match joined {
        Ok(Ok(())) => {
            debug!(topic, consumer_tag = tag, "Delivery handled");
            DeliveryOutcome::Handled
        }
        Ok(Err(HandlerError::Decode(e))) => {
            let err = EnvelopeDeserializationError::new(topic, e.to_string());
            warn!(topic, consumer_tag = tag, error = %err, "Message does not match handler type");
            DeliveryOutcome::DeserializationFailed(err)
        }
        Ok(Err(HandlerError::Failed(e))) => {
            let err = HandlerExecutionError::failed(topic, tag, format!("{e:#}"));
            error!(topic, consumer_tag = tag, error = %err, "Handler failed");
            DeliveryOutcome::HandlerFailed(err)
        }
        Err(join) => {
            let err = HandlerExecutionError::from_join_error(topic, tag, join);
            error!(topic, consumer_tag = tag, error = %err, "Handler panicked");
            DeliveryOutcome::HandlerFailed(err)
        }
    }
}

fn cancelled(topic: &str) -> StackError {
    SubscribeError::Cancelled {
        topic: topic.to_string(),
    }
    .into()
}

fn consume_failure(
    topic: &str,
    queue: &str,
    err: &StackError,
) -> StackError {
    match err.status_code() {
        StatusCode::QueueNotFound => SubscribeError::QueueNotFound {
            topic: topic.to_string(),
            queue: queue.to_string(),
        }
        .into(),
        _ => SubscribeError::ConsumeFailed {
            topic: topic.to_string(),
            reason: err.to_string(),
        }
        .into(),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Drop for Subscriber {
    fn drop(&mut self) {
        if !self.is_closed() && !self.subscriptions.is_empty() {
            warn!(
                subscriptions = self.subscriptions.len(),
                "Subscriber dropped without close(); consumers stay registered until the connection closes"
            );
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("subscriptions", &self.subscriptions.len())
            .field("channels", &self.channels)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("topic", &self.topic)
            .field("queue", &self.queue)
            .field("consumer_tag", &self.consumer_tag)
            .field("state", &self.state())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
