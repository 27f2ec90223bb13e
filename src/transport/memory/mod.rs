//! Встроенный брокер с семантикой AMQP 0-9-1.
//!
//! Работает в памяти процесса и реализует трейты транспорта, поэтому ядро
//! использует его так же, как сетевого клиента. Поддерживает виртуальные
//! хосты и пользователей, exchange типов direct/topic/fanout/headers и
//! exchange по умолчанию, эксклюзивные и auto-delete очереди, round-robin
//! между потребителями, ручные подтверждения и возврат неподтверждённых
//! сообщений при закрытии канала. Для тестов есть имитация сбоев
//! (`set_reachable`, `drop_connections`, `set_connect_delay`).

mod broker;
mod connection;
mod exchange;
mod queue;

pub use broker::{BrokerStats, MemoryBroker, DEFAULT_PASSWORD, DEFAULT_USER, DEFAULT_VHOST};
pub use connection::{MemoryChannel, MemoryConnection, MemoryConnector, CHANNEL_MAX};
pub use exchange::{headers_match, topic_matches};
