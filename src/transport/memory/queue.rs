use std::{
    collections::VecDeque,
    sync::{atomic::Ordering, Arc},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{broker::BrokerCounters, connection::ChannelState};
use crate::{
    topology::QueueConfig,
    transport::{Delivery, FieldTable, PublishProperties},
};

/// Сообщение, лежащее в очереди или ожидающее подтверждения.
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Bytes,
    pub properties: PublishProperties,
    pub redelivered: bool,
}

/// Очередь брокера.
///
/// Порядок захвата блокировок: сначала состояние очереди, затем
/// `unacked` канала. Канал никогда не берёт блокировку очереди, удерживая
/// свою.
pub(crate) struct Queue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
    /// Соединение-владелец эксклюзивной очереди
    pub owner: Option<u64>,
    counters: Arc<BrokerCounters>,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueuedMessage>,
    consumers: Vec<ConsumerSlot>,
    cursor: usize,
    had_consumers: bool,
    deleted: bool,
}

struct ConsumerSlot {
    tag: String,
    channel: Arc<ChannelState>,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Queue {
    pub fn new(
        name: String,
        config: &QueueConfig,
        owner: Option<u64>,
        counters: Arc<BrokerCounters>,
    ) -> Self {
        Self {
            name,
            durable: config.durable,
            exclusive: config.exclusive,
            auto_delete: config.auto_delete,
            arguments: config.arguments.clone(),
            owner: if config.exclusive { owner } else { None },
            counters,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Описание расхождения с повторным объявлением.
    pub fn mismatch(
        &self,
        config: &QueueConfig,
    ) -> Option<String> {
        if self.durable != config.durable {
            return Some(format!(
                "durable is {}, requested {}",
                self.durable, config.durable
            ));
        }
        if self.exclusive != config.exclusive {
            return Some(format!(
                "exclusive is {}, requested {}",
                self.exclusive, config.exclusive
            ));
        }
        if self.auto_delete != config.auto_delete {
            return Some(format!(
                "auto_delete is {}, requested {}",
                self.auto_delete, config.auto_delete
            ));
        }
        if self.arguments != config.arguments {
            return Some("arguments differ".to_string());
        }
        None
    }

    /// Доступна ли очередь соединению `connection_id`.
    pub fn accessible_by(
        &self,
        connection_id: u64,
    ) -> bool {
        match self.owner {
            Some(owner) => owner == connection_id,
            None => true,
        }
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    pub fn enqueue(
        self: &Arc<Self>,
        message: QueuedMessage,
    ) {
        let mut state = self.state.lock();
        if state.deleted {
            return;
        }
        state.ready.push_back(message);
        self.dispatch(&mut state);
    }

    /// Возвращает неподтверждённые сообщения в начало очереди, сохраняя их
    /// исходный порядок.
    pub fn requeue(
        self: &Arc<Self>,
        messages: Vec<QueuedMessage>,
    ) {
        let mut state = self.state.lock();
        if state.deleted {
            return;
        }
        self.counters
            .requeued
            .fetch_add(messages.len() as u64, Ordering::Relaxed);
        for mut message in messages.into_iter().rev() {
            message.redelivered = true;
            state.ready.push_front(message);
        }
        self.dispatch(&mut state);
    }

    pub fn add_consumer(
        self: &Arc<Self>,
        tag: String,
        channel: Arc<ChannelState>,
        sender: mpsc::UnboundedSender<Delivery>,
    ) {
        let mut state = self.state.lock();
        state.had_consumers = true;
        state.consumers.push(ConsumerSlot {
            tag,
            channel,
            sender,
        });
        self.dispatch(&mut state);
    }

    /// Удаляет потребителя. Возвращает `true`, если очередь стала
    /// auto-delete кандидатом на удаление.
    pub fn remove_consumer(
        &self,
        tag: &str,
    ) -> bool {
        let mut state = self.state.lock();
        state.consumers.retain(|slot| slot.tag != tag);
        self.auto_delete && state.had_consumers && state.consumers.is_empty() && !state.deleted
    }

    /// Помечает очередь удалённой: сообщения отбрасываются, потоки
    /// потребителей закрываются.
    pub fn mark_deleted(&self) {
        let mut state = self.state.lock();
        state.deleted = true;
        state.ready.clear();
        state.consumers.clear();
    }

    fn dispatch(
        self: &Arc<Self>,
        state: &mut QueueState,
    ) {
        while !state.ready.is_empty() && !state.consumers.is_empty() {
            let idx = state.cursor % state.consumers.len();
            if !state.consumers[idx].channel.is_open() || state.consumers[idx].sender.is_closed() {
                state.consumers.remove(idx);
                continue;
            }

            let Some(message) = state.ready.pop_front() else {
                break;
            };
            let slot = &state.consumers[idx];
            let delivery_tag = slot.channel.track(Arc::clone(self), message.clone());
            let delivery = Delivery {
                delivery_tag,
                consumer_tag: slot.tag.clone(),
                exchange: message.exchange,
                routing_key: message.routing_key,
                redelivered: message.redelivered,
                payload: message.payload,
                properties: message.properties,
            };

            if let Err(mpsc::error::SendError(returned)) = slot.sender.send(delivery) {
                slot.channel.untrack(returned.delivery_tag);
                let restored = QueuedMessage {
                    exchange: returned.exchange,
                    routing_key: returned.routing_key,
                    payload: returned.payload,
                    properties: returned.properties,
                    redelivered: returned.redelivered,
                };
                state.ready.push_front(restored);
                state.consumers.remove(idx);
                continue;
            }

            state.cursor = idx + 1;
            self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}
