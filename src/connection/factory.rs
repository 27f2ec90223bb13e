use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use courier_error::{ChannelError, CourierResult, GenericError, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ConnectionManager;
use crate::transport::BrokerChannel;

/// Открывает каналы поверх соединения [`ConnectionManager`].
///
/// Каждый вызов открывает новый канал; кэширование остаётся за
/// потребителями фабрики.
#[derive(Debug)]
pub struct ChannelFactory {
    connections: Arc<ConnectionManager>,
    opened: AtomicU64,
}

impl ChannelFactory {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            opened: AtomicU64::new(0),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Канал на уже установленном соединении.
    ///
    /// Без открытого соединения завершается `ChannelError::ConnectionNotOpen`.
    pub async fn create_channel(
        &self,
        token: &CancellationToken,
    ) -> CourierResult<Arc<dyn BrokerChannel>> {
        if token.is_cancelled() {
            return Err(
                GenericError::new(StatusCode::Cancelled, "channel creation cancelled").into(),
            );
        }
        let conn = self
            .connections
            .current()
            .ok_or(ChannelError::ConnectionNotOpen)?;

        let channel = conn.create_channel().await?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection_id = conn.id(),
            channel_id = channel.id(),
            "Channel opened"
        );
        Ok(channel)
    }

    /// Устанавливает соединение при необходимости и открывает канал.
    pub async fn open_channel(
        &self,
        token: &CancellationToken,
    ) -> CourierResult<Arc<dyn BrokerChannel>> {
        self.connections.get_connection(token).await?;
        self.create_channel(token).await
    }

    /// Количество успешно открытых каналов.
    pub fn channels_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}
