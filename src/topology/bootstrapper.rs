use std::sync::Arc;

use courier_error::{CourierResult, ResultExt, TopologyError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, field::display, info, warn};

use super::{validate_exchanges, ExchangeConfig, TopicRegistry};
use crate::{connection::ChannelFactory, transport::BrokerChannel};

/// Итог объявления топологии.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyReport {
    pub exchanges: Vec<String>,
    /// Имена очередей в том виде, в каком их вернул брокер
    pub queues: Vec<String>,
    pub bindings: usize,
}

/// Объявляет exchange, очереди и привязки при старте процесса.
///
/// Порядок: exchange, затем каждая его очередь, затем привязка этой
/// очереди. Первая же ошибка прерывает объявление. Повторный запуск на
/// неизменной конфигурации ничего не меняет на брокере.
#[derive(Debug)]
pub struct TopologyBootstrapper {
    factory: Arc<ChannelFactory>,
    registry: Arc<TopicRegistry>,
}

impl TopologyBootstrapper {
    pub fn new(
        factory: Arc<ChannelFactory>,
        registry: Arc<TopicRegistry>,
    ) -> Self {
        Self { factory, registry }
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub async fn declare(
        &self,
        exchanges: &[ExchangeConfig],
        token: &CancellationToken,
    ) -> CourierResult<TopologyReport> {
        validate_exchanges(exchanges)?;
        if token.is_cancelled() {
            return Err(TopologyError::Cancelled.into());
        }

        let channel = self
            .factory
            .open_channel(token)
            .await
            .context("failed to open topology channel")?;

        let result = self.declare_on(&*channel, exchanges, token).await;

        if let Err(e) = channel.close().await {
            warn!(error = %e, "Failed to close topology channel");
        }

        let report = result.inspect_err(|e| {
            warn!(
                status = %e.status_code(),
                resource = e.resource().map(display),
                error = %e,
                "Topology declaration failed"
            );
        })?;
        info!(
            exchanges = report.exchanges.len(),
            queues = report.queues.len(),
            bindings = report.bindings,
            "Topology declared"
        );
        Ok(report)
    }

    async fn declare_on(
        &self,
        channel: &dyn BrokerChannel,
        exchanges: &[ExchangeConfig],
        token: &CancellationToken,
    ) -> CourierResult<TopologyReport> {
        let mut report = TopologyReport::default();

        for exchange in exchanges {
            if token.is_cancelled() {
                return Err(TopologyError::Cancelled.into());
            }

            channel
                .exchange_declare(exchange)
                .await
                .with_context(|| format!("failed to declare exchange '{}'", exchange.name))?;
            debug!(exchange = %exchange.name, kind = %exchange.kind, "Exchange declared");

            for queue in &exchange.queues {
                let queue_name = channel.queue_declare(queue).await.with_context(|| {
                    format!(
                        "failed to declare queue '{}' of exchange '{}'",
                        queue.name, exchange.name
                    )
                })?;

                channel
                    .queue_bind(
                        &queue_name,
                        &exchange.name,
                        &queue.routing_key,
                        &queue.bindings,
                    )
                    .await
                    .with_context(|| {
                        format!(
                            "failed to bind queue '{}' to exchange '{}'",
                            queue_name, exchange.name
                        )
                    })?;
                debug!(
                    exchange = %exchange.name,
                    queue = %queue_name,
                    routing_key = %queue.routing_key,
                    "Queue declared and bound"
                );

                report.queues.push(queue_name);
                report.bindings += 1;
            }

            self.registry.register(exchange.clone());
            report.exchanges.push(exchange.name.clone());
        }

        Ok(report)
    }
}
