use std::{collections::BTreeMap, future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::SubscriberArgs;
use crate::envelope::Envelope;

/// Почему обработчик не принял доставку.
#[derive(Debug)]
pub enum HandlerError {
    /// Сообщение не приводится к типу обработчика
    Decode(serde_json::Error),
    /// Ошибка, возвращённая пользовательским кодом
    Failed(anyhow::Error),
}

/// Обработчик доставок с типом сообщения, стёртым до JSON.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: Envelope<Value>,
        token: CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Типизированный обработчик поверх замыкания.
struct FnHandler<T, F> {
    f: F,
    _message: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> DeliveryHandler for FnHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(Envelope<T>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(
        &self,
        envelope: Envelope<Value>,
        token: CancellationToken,
    ) -> Result<(), HandlerError> {
        let typed = envelope
            .decode_message::<T>()
            .map_err(HandlerError::Decode)?;
        (self.f)(typed, token).await.map_err(HandlerError::Failed)
    }
}

/// Оборачивает замыкание `Fn(Envelope<T>, CancellationToken)` в
/// [`DeliveryHandler`].
pub fn handler_fn<T, F, Fut>(f: F) -> Arc<dyn DeliveryHandler>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(Envelope<T>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _message: PhantomData,
    })
}

/// Регистрация обработчика в [`HandlerRegistry`].
#[derive(Clone)]
pub struct HandlerRegistration {
    pub topic: String,
    pub args: SubscriberArgs,
    pub handler: Arc<dyn DeliveryHandler>,
}

/// Явная таблица топик → обработчик, заполняемая при конфигурации.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: BTreeMap<String, HandlerRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует типизированный обработчик. Повторная регистрация топика
    /// заменяет прежнюю.
    pub fn register<T, F, Fut>(
        &mut self,
        topic: impl Into<String>,
        args: SubscriberArgs,
        f: F,
    ) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Envelope<T>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(topic, args, handler_fn(f))
    }

    pub fn register_handler(
        &mut self,
        topic: impl Into<String>,
        args: SubscriberArgs,
        handler: Arc<dyn DeliveryHandler>,
    ) -> &mut Self {
        let topic = topic.into();
        self.entries.insert(
            topic.clone(),
            HandlerRegistration {
                topic,
                args,
                handler,
            },
        );
        self
    }

    pub fn get(
        &self,
        topic: &str,
    ) -> Option<&HandlerRegistration> {
        self.entries.get(topic)
    }

    /// Регистрации в порядке имён топиков.
    pub fn iter(&self) -> impl Iterator<Item = &HandlerRegistration> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("topic", &self.topic)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
