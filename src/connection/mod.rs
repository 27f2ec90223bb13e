//! Соединение с брокером и фабрика каналов.

mod factory;
mod manager;

pub use factory::ChannelFactory;
pub use manager::ConnectionManager;
