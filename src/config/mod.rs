//! Конфигурация: параметры брокера, топология и логирование.

mod broker;
mod settings;

pub use broker::BrokerSettings;
pub use settings::{Settings, ENV_PREFIX};
use thiserror::Error;

use crate::logging::LoggingError;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid broker setting '{field}': {reason}")]
    InvalidBroker { field: &'static str, reason: String },

    #[error("Invalid topology: {0}")]
    Topology(String),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}
