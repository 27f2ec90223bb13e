use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use courier::{
    pubsub::DeliveryEvent, CancellationToken, Envelope, ExchangeConfig, ExchangeKind,
    HandlerRegistry, MemoryBroker, MessageBus, QueueConfig, StatusCode, SubscriberArgs,
    TopologyConfig,
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{broadcast, mpsc},
    time::timeout,
};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderCreated {
    id: u64,
}

async fn bus_with(exchanges: Vec<ExchangeConfig>) -> (MemoryBroker, MessageBus) {
    let broker = MemoryBroker::new();
    let bus = MessageBus::new(Default::default(), Arc::new(broker.connector()));
    bus.bootstrap(&TopologyConfig::new(exchanges), &CancellationToken::new())
        .await
        .unwrap();
    (broker, bus)
}

fn orders() -> ExchangeConfig {
    ExchangeConfig::new("orders", ExchangeKind::Topic)
        .with_queue(QueueConfig::new("orders.created").with_routing_key("created"))
}

async fn next_event(rx: &mut broadcast::Receiver<DeliveryEvent>) -> DeliveryEvent {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

/// Тест проверяет сквозной сценарий: публикация в `orders` доходит до
/// подписчика очереди `orders.created` с тем же correlation id и
/// сообщением.
#[tokio::test]
async fn test_orders_round_trip() {
    let (_broker, bus) = bus_with(vec![orders()]).await;
    let publisher = bus.publisher();
    let subscriber = bus.subscriber();
    let token = CancellationToken::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    subscriber
        .subscribe(
            "orders",
            move |env: Envelope<OrderCreated>, _token| {
                let tx = tx.clone();
                async move {
                    tx.send(env).map_err(|_| anyhow::anyhow!("receiver dropped"))?;
                    anyhow::Ok(())
                }
            },
            SubscriberArgs::default().with_queue("orders.created"),
            &token,
        )
        .await
        .unwrap();

    publisher
        .publish("orders", &OrderCreated { id: 1 }, Some("corr-1"), &token)
        .await
        .unwrap();

    let received = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received.message(), &OrderCreated { id: 1 });
    assert_eq!(received.correlation_id(), Some("corr-1"));
    assert!(received.message_id().is_some());

    subscriber.close().await.unwrap();
    publisher.close().await.unwrap();
    bus.shutdown().await.unwrap();
}

/// Тест проверяет, что N одновременных публикаций в новый топик открывают
/// ровно один канал.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_channel_under_concurrent_publish() {
    let (broker, bus) = bus_with(vec![orders()]).await;
    let publisher = Arc::new(bus.publisher());

    let mut tasks = Vec::new();
    for id in 0..64 {
        let publisher = Arc::clone(&publisher);
        tasks.push(tokio::spawn(async move {
            publisher
                .publish("orders", &OrderCreated { id }, None, &CancellationToken::new())
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(publisher.channels_created(), 1);
    assert_eq!(publisher.published_count(), 64);
    assert_eq!(broker.message_count("orders.created"), 64);
}

/// Тест проверяет, что публикация в необъявленный топик не создаёт
/// трафика к брокеру.
#[tokio::test]
async fn test_unknown_topic_rejected() {
    let (broker, bus) = bus_with(vec![orders()]).await;
    let publisher = bus.publisher();
    let before = broker.stats();

    let err = publisher
        .publish("undeclared-topic", &OrderCreated { id: 1 }, None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), StatusCode::TopicNotConfigured);
    let after = broker.stats();
    assert_eq!(after.channels_opened, before.channels_opened);
    assert_eq!(after.published, before.published);
}

/// Тест проверяет, что после отписки обработчик больше не вызывается.
#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (broker, bus) = bus_with(vec![orders()]).await;
    let publisher = bus.publisher();
    let subscriber = bus.subscriber();
    let token = CancellationToken::new();
    let mut events = subscriber.events();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handle = subscriber
        .subscribe(
            "orders",
            move |_: Envelope<OrderCreated>, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            },
            SubscriberArgs::default(),
            &token,
        )
        .await
        .unwrap();

    publisher
        .publish("orders", &OrderCreated { id: 1 }, None, &token)
        .await
        .unwrap();
    next_event(&mut events).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(subscriber.unsubscribe(&handle, &token).await.unwrap());
    assert!(subscriber.subscription(&handle).is_none());
    assert!(!subscriber.unsubscribe(&handle, &token).await.unwrap());

    publisher
        .publish("orders", &OrderCreated { id: 2 }, None, &token)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(broker.message_count("orders.created"), 1);
}

/// Тест проверяет, что сбой обработчика на сообщении A не мешает доставке
/// сообщения B ни той же, ни другой подписке.
#[tokio::test]
async fn test_handler_failure_isolation() {
    let audit = ExchangeConfig::new("audit", ExchangeKind::Fanout)
        .with_queue(QueueConfig::new("audit.all"));
    let (_broker, bus) = bus_with(vec![orders(), audit]).await;
    let publisher = bus.publisher();
    let subscriber = bus.subscriber();
    let token = CancellationToken::new();
    let mut events = subscriber.events();

    subscriber
        .subscribe(
            "orders",
            |env: Envelope<OrderCreated>, _| async move {
                if env.message().id == 1 {
                    anyhow::bail!("order {} rejected", env.message().id);
                }
                Ok(())
            },
            SubscriberArgs::default(),
            &token,
        )
        .await
        .unwrap();
    subscriber
        .subscribe(
            "audit",
            |_: Envelope<OrderCreated>, _| async { anyhow::Ok(()) },
            SubscriberArgs::default(),
            &token,
        )
        .await
        .unwrap();

    publisher
        .publish("orders", &OrderCreated { id: 1 }, None, &token)
        .await
        .unwrap();
    publisher
        .publish("orders", &OrderCreated { id: 2 }, None, &token)
        .await
        .unwrap();
    publisher
        .publish("audit", &OrderCreated { id: 3 }, None, &token)
        .await
        .unwrap();

    let mut failed = 0;
    let mut handled = 0;
    for _ in 0..3 {
        let event = next_event(&mut events).await;
        if event.outcome.is_failure() {
            failed += 1;
        } else {
            handled += 1;
        }
    }
    assert_eq!(failed, 1);
    assert_eq!(handled, 2);
    assert_eq!(subscriber.stats().acked, 3);
}

/// Тест проверяет, что битое сообщение не вызывает обработчик, а
/// подписка продолжает работать.
#[tokio::test]
async fn test_malformed_payload_keeps_loop_alive() {
    let (broker, bus) = bus_with(vec![orders()]).await;
    let publisher = bus.publisher();
    let subscriber = bus.subscriber();
    let token = CancellationToken::new();
    let mut events = subscriber.events();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    subscriber
        .subscribe(
            "orders",
            move |_: Envelope<OrderCreated>, _| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            },
            SubscriberArgs::default(),
            &token,
        )
        .await
        .unwrap();

    broker
        .publish("orders", "created", &b"\x00\x01garbage"[..])
        .unwrap();
    publisher
        .publish("orders", &OrderCreated { id: 9 }, None, &token)
        .await
        .unwrap();

    let first = next_event(&mut events).await;
    assert!(first.outcome.is_failure());
    let second = next_event(&mut events).await;
    assert!(!second.outcome.is_failure());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(subscriber.stats().deserialization_failed, 1);
    assert_eq!(broker.message_count("orders.created"), 0);
}

/// Тест проверяет подписку по реестру обработчиков и её откат при ошибке.
#[tokio::test]
async fn test_registry_subscription_and_rollback() {
    let (broker, bus) = bus_with(vec![orders()]).await;
    let subscriber = bus.subscriber();
    let token = CancellationToken::new();

    let mut registry = HandlerRegistry::new();
    registry.register(
        "orders",
        SubscriberArgs::default(),
        |_: Envelope<OrderCreated>, _| async { anyhow::Ok(()) },
    );
    let handles = subscriber.subscribe_registry(&registry, &token).await.unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(broker.consumer_count("orders.created"), 1);
    subscriber.close().await.unwrap();

    let subscriber = bus.subscriber();
    registry.register(
        "payments",
        SubscriberArgs::default(),
        |_: Envelope<OrderCreated>, _| async { anyhow::Ok(()) },
    );
    let err = subscriber
        .subscribe_registry(&registry, &token)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::TopicNotConfigured);
    assert!(subscriber.subscriptions().is_empty());
    assert_eq!(broker.consumer_count("orders.created"), 0);
}

/// Тест проверяет, что неподтверждённые доставки возвращаются в очередь
/// при закрытии подписчика и достаются следующему.
#[tokio::test]
async fn test_inflight_delivery_redelivered_after_close() {
    let (broker, bus) = bus_with(vec![orders()]).await;
    let publisher = bus.publisher();
    let token = CancellationToken::new();

    let first = bus.subscriber();
    let started = Arc::new(tokio::sync::Notify::new());
    let signal = Arc::clone(&started);
    first
        .subscribe(
            "orders",
            move |_: Envelope<OrderCreated>, token: CancellationToken| {
                let signal = Arc::clone(&signal);
                async move {
                    signal.notify_one();
                    token.cancelled().await;
                    Err::<(), _>(anyhow::anyhow!("shutting down"))
                }
            },
            SubscriberArgs::default(),
            &token,
        )
        .await
        .unwrap();

    publisher
        .publish("orders", &OrderCreated { id: 1 }, None, &token)
        .await
        .unwrap();
    publisher
        .publish("orders", &OrderCreated { id: 2 }, None, &token)
        .await
        .unwrap();
    timeout(WAIT, started.notified()).await.unwrap();

    // Первая доставка в обработчике, вторая ждёт в буфере
    first.close().await.unwrap();
    let stats = first.stats();
    assert_eq!(stats.handler_failed, 1);
    assert_eq!(stats.requeued, 1);
    assert_eq!(broker.message_count("orders.created"), 1);

    let second = bus.subscriber();
    let mut events = second.events();
    second
        .subscribe(
            "orders",
            |_: Envelope<OrderCreated>, _| async { anyhow::Ok(()) },
            SubscriberArgs::default(),
            &token,
        )
        .await
        .unwrap();
    let event = next_event(&mut events).await;
    assert!(event.redelivered);
}
