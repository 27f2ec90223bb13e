use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use courier_error::{
    ConnectionError, CourierResult, GenericError, ObjectDisposedError, StackError, StatusCode,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::BrokerSettings,
    transport::{BrokerConnection, Connector},
};

type Outcome = Result<Arc<dyn BrokerConnection>, StackError>;

/// Единственное логическое соединение процесса с брокером.
///
/// Соединение создаётся лениво при первом `get_connection` и пересоздаётся,
/// только если прежнее закрылось. Одновременно выполняется не более одной
/// попытки подключения: остальные вызовы ждут её результат. Попытка
/// выполняется в отдельной задаче, поэтому отмена ожидания одним вызывающим
/// не прерывает её для остальных.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    settings: BrokerSettings,
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
    disposed: AtomicBool,
    attempts: AtomicU64,
}

enum Slot {
    Idle,
    Connecting(watch::Receiver<Option<Outcome>>),
    Open(Arc<dyn BrokerConnection>),
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ConnectionManager {
    pub fn new(
        settings: BrokerSettings,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                connector,
                slot: Mutex::new(Slot::Idle),
                disposed: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    /// Возвращает открытое соединение, при необходимости подключаясь.
    pub async fn get_connection(
        &self,
        token: &CancellationToken,
    ) -> CourierResult<Arc<dyn BrokerConnection>> {
        let mut rx = {
            let mut slot = self.inner.slot.lock();
            if self.inner.disposed.load(Ordering::Acquire) {
                return Err(ObjectDisposedError::new("ConnectionManager").into());
            }
            if token.is_cancelled() {
                return Err(cancelled());
            }

            match &*slot {
                Slot::Open(conn) if conn.is_open() => return Ok(Arc::clone(conn)),
                Slot::Connecting(rx) => rx.clone(),
                Slot::Open(conn) => {
                    debug!(connection_id = conn.id(), "Connection lost, reconnecting");
                    self.start_attempt(&mut slot)
                }
                Slot::Idle => self.start_attempt(&mut slot),
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(cancelled()),
            outcome = rx.wait_for(Option::is_some) => match outcome {
                Ok(outcome) => match &*outcome {
                    Some(result) => result.clone(),
                    None => Err(attempt_lost()),
                },
                Err(_) => Err(attempt_lost()),
            },
        }
    }

    /// Текущее открытое соединение без попытки подключения.
    pub fn current(&self) -> Option<Arc<dyn BrokerConnection>> {
        match &*self.inner.slot.lock() {
            Slot::Open(conn) if conn.is_open() => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Сколько раз вызывался `Connector::connect`.
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Закрывает соединение. Дальнейшие `get_connection` завершаются
    /// `ObjectDisposedError`. Повторный вызов ничего не делает.
    pub async fn close(&self) -> CourierResult<()> {
        let previous = {
            let mut slot = self.inner.slot.lock();
            if self.inner.disposed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            std::mem::replace(&mut *slot, Slot::Idle)
        };

        if let Slot::Open(conn) = previous {
            info!(connection_id = conn.id(), "Closing broker connection");
            conn.close().await?;
        }
        Ok(())
    }

    fn start_attempt(
        &self,
        slot: &mut Slot,
    ) -> watch::Receiver<Option<Outcome>> {
        let (tx, rx) = watch::channel(None);
        *slot = Slot::Connecting(rx.clone());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.connect_once().await;
            let outcome = inner.settle(outcome).await;
            let _ = tx.send(Some(outcome));
        });

        rx
    }
}

impl Inner {
    async fn connect_once(&self) -> Outcome {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let timeout = self.settings.connect_timeout();
        debug!(
            address = %self.settings.address(),
            vhost = %self.settings.virtual_host,
            attempt,
            "Connecting to broker"
        );

        match tokio::time::timeout(timeout, self.connector.connect(&self.settings)).await {
            Ok(Ok(conn)) => {
                info!(
                    connection_id = conn.id(),
                    address = %self.settings.address(),
                    "Broker connection established"
                );
                Ok(conn)
            }
            Ok(Err(e)) => {
                warn!(address = %self.settings.address(), error = %e, "Broker connection failed");
                Err(e)
            }
            Err(_) => {
                warn!(
                    address = %self.settings.address(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Broker connection timed out"
                );
                Err(ConnectionError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }

    /// Публикует результат попытки в слот. Если менеджер закрыли во время
    /// подключения, новое соединение сразу закрывается.
    async fn settle(
        &self,
        outcome: Outcome,
    ) -> Outcome {
        let orphan = {
            let mut slot = self.slot.lock();
            if self.disposed.load(Ordering::Acquire) {
                *slot = Slot::Idle;
                outcome.as_ref().ok().cloned()
            } else {
                *slot = match &outcome {
                    Ok(conn) => Slot::Open(Arc::clone(conn)),
                    Err(_) => Slot::Idle,
                };
                None
            }
        };

        match orphan {
            Some(conn) => {
                let _ = conn.close().await;
                Err(ObjectDisposedError::new("ConnectionManager").into())
            }
            None if self.disposed.load(Ordering::Acquire) => {
                Err(ObjectDisposedError::new("ConnectionManager").into())
            }
            None => outcome,
        }
    }
}

fn cancelled() -> StackError {
    GenericError::new(StatusCode::Cancelled, "wait for broker connection cancelled").into()
}

fn attempt_lost() -> StackError {
    GenericError::new(StatusCode::Internal, "connection attempt ended without a result").into()
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Debug for ConnectionManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = match &*self.inner.slot.lock() {
            Slot::Idle => "idle",
            Slot::Connecting(_) => "connecting",
            Slot::Open(conn) if conn.is_open() => "open",
            Slot::Open(_) => "lost",
        };
        f.debug_struct("ConnectionManager")
            .field("address", &self.inner.settings.address())
            .field("state", &state)
            .field("closed", &self.is_closed())
            .field("attempts", &self.connect_attempts())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::MemoryBroker;

    fn manager(broker: &MemoryBroker) -> ConnectionManager {
        ConnectionManager::new(BrokerSettings::default(), Arc::new(broker.connector()))
    }

    /// Тест проверяет, что соединение переиспользуется.
    #[tokio::test]
    async fn test_connection_is_reused() {
        let broker = MemoryBroker::new();
        let manager = manager(&broker);
        let token = CancellationToken::new();

        assert!(manager.current().is_none());
        let a = manager.get_connection(&token).await.unwrap();
        let b = manager.get_connection(&token).await.unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(manager.connect_attempts(), 1);
        assert!(manager.is_connected());
    }

    /// Тест проверяет, что параллельные вызовы делят одну попытку
    /// подключения.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight() {
        let broker = MemoryBroker::new();
        broker.set_connect_delay(Duration::from_millis(50));
        let manager = Arc::new(manager(&broker));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager
                    .get_connection(&CancellationToken::new())
                    .await
                    .map(|c| c.id())
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(manager.connect_attempts(), 1);
        assert_eq!(broker.stats().connection_attempts, 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let manager = manager(&broker);

        let err = manager
            .get_connection(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ConnectionFailed);
        assert!(err.is::<ConnectionError>());

        broker.set_reachable(true);
        assert!(manager
            .get_connection(&CancellationToken::new())
            .await
            .is_ok());
        assert_eq!(manager.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let broker = MemoryBroker::new();
        broker.set_connect_delay(Duration::from_secs(30));
        let settings = BrokerSettings {
            connect_timeout_ms: 100,
            ..Default::default()
        };
        let manager = ConnectionManager::new(settings, Arc::new(broker.connector()));

        let err = manager
            .get_connection(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Timeout);
    }

    /// Тест проверяет, что после потери соединения создаётся новое.
    #[tokio::test]
    async fn test_reconnect_after_loss() {
        let broker = MemoryBroker::new();
        let manager = manager(&broker);
        let token = CancellationToken::new();

        let first = manager.get_connection(&token).await.unwrap();
        assert_eq!(broker.drop_connections(), 1);
        assert!(manager.current().is_none());

        let second = manager.get_connection(&token).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(manager.connect_attempts(), 2);
    }

    /// Тест проверяет, что отмена ожидания одним вызывающим не мешает
    /// другим.
    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_abort_attempt() {
        let broker = MemoryBroker::new();
        broker.set_connect_delay(Duration::from_millis(200));
        let manager = Arc::new(manager(&broker));

        let cancelled = CancellationToken::new();
        let waiter = {
            let manager = Arc::clone(&manager);
            let token = cancelled.clone();
            tokio::spawn(async move { manager.get_connection(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancelled.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Cancelled);

        let conn = manager
            .get_connection(&CancellationToken::new())
            .await
            .unwrap();
        assert!(conn.is_open());
        assert_eq!(manager.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_close_disposes_manager() {
        let broker = MemoryBroker::new();
        let manager = manager(&broker);
        let conn = manager
            .get_connection(&CancellationToken::new())
            .await
            .unwrap();

        manager.close().await.unwrap();
        manager.close().await.unwrap();
        assert!(!conn.is_open());
        assert!(manager.is_closed());

        let err = manager
            .get_connection(&CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Disposed);
        assert!(err.is::<ObjectDisposedError>());
    }
}
