use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use courier_error::{CourierResult, ObjectDisposedError, PublishError, ResultExt, StackError};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::TopicCache;
use crate::{
    connection::ChannelFactory,
    envelope::Envelope,
    topology::TopicRegistry,
    transport::{DeliveryMode, FieldTable, PublishProperties},
};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Необязательные параметры публикации.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    /// Routing key; по умолчанию берётся из конфигурации exchange
    pub routing_key: Option<String>,
    /// Идентификатор сообщения; по умолчанию UUID v4
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub headers: FieldTable,
}

/// Публикует сообщения в топики.
///
/// Для каждого топика держит собственный канал, открываемый при первой
/// публикации. Последовательные публикации одного вызывающего передаются
/// транспорту в порядке вызова.
pub struct Publisher {
    factory: Arc<ChannelFactory>,
    registry: Arc<TopicRegistry>,
    channels: TopicCache,
    closed: AtomicBool,
    published: AtomicU64,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PublishOptions {
    pub fn with_routing_key(
        mut self,
        key: impl Into<String>,
    ) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn with_message_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_header(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

impl Publisher {
    pub fn new(
        factory: Arc<ChannelFactory>,
        registry: Arc<TopicRegistry>,
    ) -> Self {
        Self {
            factory,
            registry,
            channels: TopicCache::new("Publisher"),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
        }
    }

    /// Публикует сообщение с необязательным correlation id.
    pub async fn publish<T>(
        &self,
        topic: &str,
        message: &T,
        correlation_id: Option<&str>,
        token: &CancellationToken,
    ) -> CourierResult<()>
    where
        T: Serialize + ?Sized,
    {
        let options = PublishOptions {
            correlation_id: correlation_id.map(str::to_owned),
            ..Default::default()
        };
        self.publish_with(topic, message, options, token).await
    }

    pub async fn publish_with<T>(
        &self,
        topic: &str,
        message: &T,
        options: PublishOptions,
        token: &CancellationToken,
    ) -> CourierResult<()>
    where
        T: Serialize + ?Sized,
    {
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

        let PublishOptions {
            routing_key,
            message_id,
            correlation_id,
            headers,
        } = options;

        let mut envelope = Envelope::new(message).with_correlation_id(correlation_id);
        envelope = match message_id {
            Some(id) => envelope.with_message_id(id),
            None => envelope.with_generated_id(),
        };

        let payload = envelope
            .encode()
            .map_err(|e| PublishError::Serialization {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let routing_key = routing_key.unwrap_or_else(|| exchange.default_routing_key().to_string());
        let properties = PublishProperties {
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            message_id: envelope.message_id().map(str::to_owned),
            correlation_id: envelope.correlation_id().map(str::to_owned),
            timestamp: Some(envelope.published_at().timestamp()),
            headers,
            delivery_mode: if exchange.durable {
                DeliveryMode::Persistent
            } else {
                DeliveryMode::Transient
            },
        };
        let message_id = properties.message_id.clone();

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(cancelled(topic)),
            result = channel.basic_publish(&exchange.name, &routing_key, payload, properties) => {
                result.map_err(|e| {
                    // Канал закрыл close(), пока шла публикация
                    if self.is_closed() {
                        ObjectDisposedError::new("Publisher").into()
                    } else {
                        transport_failure(topic, &e)
                    }
                })?;
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(
            topic,
            routing_key = %routing_key,
            message_id = message_id.as_deref().unwrap_or("-"),
            channel_id = channel.id(),
            "Envelope published"
        );
        Ok(())
    }

    /// Количество успешных публикаций.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Сколько каналов открыл кэш издателя.
    pub fn channels_created(&self) -> u64 {
        self.channels.created()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Закрывает все каналы. Дальнейшие публикации завершаются
    /// `ObjectDisposedError`.
    pub async fn close(&self) -> CourierResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let closed = self.channels.close_all().await;
        info!(
            channels = closed,
            published = self.published_count(),
            "Publisher closed"
        );
        Ok(())
    }

    fn ensure_open(&self) -> CourierResult<()> {
        if self.is_closed() {
            return Err(ObjectDisposedError::new("Publisher").into());
        }
        Ok(())
    }
}

fn cancelled(topic: &str) -> StackError {
    PublishError::Cancelled {
        topic: topic.to_string(),
    }
    .into()
}

fn transport_failure(
    topic: &str,
    err: &StackError,
) -> StackError {
    PublishError::Transport {
        topic: topic.to_string(),
        reason: err.to_string(),
    }
    .into()
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.is_closed() && !self.channels.is_empty() {
            warn!(
                channels = self.channels.len(),
                "Publisher dropped without close(); channels stay open until the connection closes"
            );
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("channels", &self.channels)
            .field("published", &self.published_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
