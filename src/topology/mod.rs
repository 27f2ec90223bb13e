//! Описание топологии брокера и её объявление при старте.

mod bootstrapper;
mod config;
mod registry;

pub use bootstrapper::{TopologyBootstrapper, TopologyReport};
pub use config::{validate_exchanges, ExchangeConfig, ExchangeKind, QueueConfig, TopologyConfig};
pub use registry::TopicRegistry;
