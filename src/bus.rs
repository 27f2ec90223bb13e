//! Сборка ядра для процесса-хоста.

use std::sync::Arc;

use courier_error::CourierResult;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::{BrokerSettings, Settings},
    connection::{ChannelFactory, ConnectionManager},
    pubsub::{Publisher, Subscriber},
    topology::{TopicRegistry, TopologyBootstrapper, TopologyConfig, TopologyReport},
    transport::Connector,
};

/// Менеджер соединения, фабрика каналов и реестр топиков одного процесса.
///
/// Порядок использования: `bootstrap` при старте, затем `publisher` и
/// `subscriber`, в конце `shutdown`.
#[derive(Debug)]
pub struct MessageBus {
    connections: Arc<ConnectionManager>,
    factory: Arc<ChannelFactory>,
    registry: Arc<TopicRegistry>,
}

impl MessageBus {
    pub fn new(
        settings: BrokerSettings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(settings, connector));
        let factory = Arc::new(ChannelFactory::new(Arc::clone(&connections)));
        Self {
            connections,
            factory,
            registry: Arc::new(TopicRegistry::new()),
        }
    }

    /// Шина и объявление топологии из загруженных настроек.
    pub async fn from_settings(
        settings: &Settings,
        connector: Arc<dyn Connector>,
        token: &CancellationToken,
    ) -> CourierResult<Self> {
        let bus = Self::new(settings.broker.clone(), connector);
        bus.bootstrap(&settings.topology, token).await?;
        Ok(bus)
    }

    /// Объявляет топологию. Безопасно вызывать повторно.
    pub async fn bootstrap(
        &self,
        topology: &TopologyConfig,
        token: &CancellationToken,
    ) -> CourierResult<TopologyReport> {
        TopologyBootstrapper::new(Arc::clone(&self.factory), Arc::clone(&self.registry))
            .declare(&topology.exchanges, token)
            .await
    }

    /// Новый издатель со своим кэшем каналов.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(Arc::clone(&self.factory), Arc::clone(&self.registry))
    }

    /// Новый подписчик со своим кэшем каналов.
    pub fn subscriber(&self) -> Subscriber {
        Subscriber::new(Arc::clone(&self.factory), Arc::clone(&self.registry))
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn channels(&self) -> &Arc<ChannelFactory> {
        &self.factory
    }

    /// Закрывает соединение. Фасады, выданные шиной, следует закрыть раньше.
    pub async fn shutdown(&self) -> CourierResult<()> {
        if let Err(e) = self.connections.close().await {
            warn!(error = %e, "Broker connection closed with error");
            return Err(e);
        }
        info!(
            connect_attempts = self.connections.connect_attempts(),
            channels_opened = self.factory.channels_opened(),
            "Message bus shut down"
        );
        Ok(())
    }
}
