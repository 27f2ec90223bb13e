use std::{sync::Arc, time::Duration};

use courier::{
    logging::init_logging, CancellationToken, DeliveryOutcome, Envelope, ExchangeConfig,
    ExchangeKind, MemoryBroker, MessageBus, PublishOptions, QueueConfig, Settings,
    SubscriberArgs, TopologyConfig,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct OrderCreated {
    id: u64,
    region: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // COURIER__* из окружения и courier.toml, если он есть рядом
    let mut settings = Settings::load_from("courier.toml")?;
    if settings.topology.exchanges.is_empty() {
        settings.topology = demo_topology();
    }
    let logging = init_logging(settings.logging.clone())?;

    let broker = MemoryBroker::new();
    let token = CancellationToken::new();
    let bus = MessageBus::from_settings(&settings, Arc::new(broker.connector()), &token).await?;
    info!(topics = ?bus.registry().topics(), "Topology ready");

    let subscriber = bus.subscriber();
    let mut events = subscriber.events();
    let handle = subscriber
        .subscribe(
            "orders",
            |env: Envelope<OrderCreated>, _token| async move {
                let order = env.message();
                if order.region == "mars" {
                    anyhow::bail!("no delivery to {}", order.region);
                }
                info!(
                    id = order.id,
                    region = %order.region,
                    correlation_id = env.correlation_id().unwrap_or("-"),
                    "Order received"
                );
                Ok(())
            },
            SubscriberArgs::default().with_queue("orders.created"),
            &token,
        )
        .await?;

    let publisher = bus.publisher();
    for (id, region) in [(1, "eu"), (2, "mars"), (3, "us")] {
        let order = OrderCreated {
            id,
            region: region.to_string(),
        };
        publisher
            .publish_with(
                "orders",
                &order,
                PublishOptions::default()
                    .with_routing_key(format!("order.created.{region}"))
                    .with_correlation_id(format!("corr-{id}")),
                &token,
            )
            .await?;
    }

    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await??;
        match &event.outcome {
            DeliveryOutcome::HandlerFailed(e) => {
                println!("delivery {} failed: {}", event.delivery_tag, e.reason)
            }
            outcome => println!("delivery {} -> {outcome:?}", event.delivery_tag),
        }
    }

    let stats = subscriber.stats();
    println!(
        "received={} handled={} failed={} acked={}",
        stats.received, stats.handled, stats.handler_failed, stats.acked
    );

    subscriber.unsubscribe(&handle, &token).await?;
    subscriber.close().await?;
    publisher.close().await?;
    bus.shutdown().await?;
    logging.shutdown();
    Ok(())
}

fn demo_topology() -> TopologyConfig {
    TopologyConfig::new(vec![ExchangeConfig::new("orders", ExchangeKind::Topic)
        .with_queue(QueueConfig::new("orders.created").with_routing_key("order.created.*"))])
}
