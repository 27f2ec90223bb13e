use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use courier_error::{ChannelError, CourierResult, ObjectDisposedError};
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::transport::BrokerChannel;

type Slot = Arc<OnceCell<Arc<dyn BrokerChannel>>>;

/// Кэш каналов «топик → канал» одного фасада.
///
/// Канал для топика создаётся ровно один раз даже при одновременном первом
/// обращении: все вызывающие получают одну и ту же ячейку, а `OnceCell`
/// выполняет инициализацию единожды. Блокировка шарда `DashMap` держится
/// только на время выборки ячейки, поэтому публикации в уже открытый канал
/// друг друга не ждут. Закрытый канал (например, после потери соединения)
/// вытесняется и создаётся заново при следующем обращении.
///
/// После `close_all` кэш закрыт навсегда: канал, открытый запросом, который
/// начался до закрытия, сразу закрывается и наружу не отдаётся.
pub struct TopicCache {
    owner: &'static str,
    slots: DashMap<Arc<str>, Slot>,
    created: AtomicU64,
    closed: AtomicBool,
}

impl TopicCache {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            slots: DashMap::new(),
            created: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Канал топика; `create` вызывается, только если открытого канала нет.
    pub async fn get_or_create<F, Fut>(
        &self,
        topic: &str,
        create: F,
    ) -> CourierResult<Arc<dyn BrokerChannel>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CourierResult<Arc<dyn BrokerChannel>>>,
    {
        if self.is_closed() {
            return Err(ObjectDisposedError::new(self.owner).into());
        }

        // Вторая попытка нужна, если закэшированный канал оказался закрытым
        for _ in 0..2 {
            let slot = self.slot(topic);
            let channel = slot
                .get_or_try_init(|| async {
                    let channel = create().await?;
                    self.created.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        owner = self.owner,
                        topic,
                        channel_id = channel.id(),
                        "Channel cached"
                    );
                    Ok::<_, courier_error::StackError>(channel)
                })
                .await?;

            // Закрытие могло случиться, пока канал создавался
            if self.is_closed() {
                let channel = Arc::clone(channel);
                self.slots
                    .remove_if(topic, |_, current| Arc::ptr_eq(current, &slot));
                if let Err(e) = channel.close().await {
                    warn!(owner = self.owner, topic, error = %e, "Failed to close channel");
                }
                debug!(owner = self.owner, topic, "Channel opened after close discarded");
                return Err(ObjectDisposedError::new(self.owner).into());
            }

            if channel.is_open() {
                return Ok(Arc::clone(channel));
            }

            debug!(
                owner = self.owner,
                topic,
                channel_id = channel.id(),
                "Evicting closed channel"
            );
            self.slots
                .remove_if(topic, |_, current| Arc::ptr_eq(current, &slot));
        }

        Err(ChannelError::OpenFailed {
            reason: format!("channel for topic '{topic}' closed right after opening"),
        }
        .into())
    }

    /// Закэшированный канал без создания.
    pub fn get(
        &self,
        topic: &str,
    ) -> Option<Arc<dyn BrokerChannel>> {
        self.slots
            .get(topic)
            .and_then(|slot| slot.get().map(Arc::clone))
    }

    /// Сколько каналов создал кэш за всё время.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Закрывает и удаляет все каналы. Возвращает число закрытых каналов.
    pub async fn close_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let topics: Vec<Arc<str>> = self.slots.iter().map(|e| Arc::clone(e.key())).collect();
        let mut closed = 0;
        for topic in topics {
            let Some((_, slot)) = self.slots.remove(&topic) else {
                continue;
            };
            if let Some(channel) = slot.get() {
                if let Err(e) = channel.close().await {
                    warn!(owner = self.owner, topic = %topic, error = %e, "Failed to close channel");
                }
                closed += 1;
            }
        }
        closed
    }

    fn slot(
        &self,
        topic: &str,
    ) -> Slot {
        if let Some(slot) = self.slots.get(topic) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(Arc::from(topic))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        )
    }
}

impl std::fmt::Debug for TopicCache {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TopicCache")
            .field("owner", &self.owner)
            .field("topics", &self.slots.len())
            .field("created", &self.created())
            .field("closed", &self.is_closed())
            .finish()
    }
}
