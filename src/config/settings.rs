use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use super::{BrokerSettings, SettingsError};
use crate::{logging::LoggingConfig, topology::TopologyConfig};

/// Префикс переменных окружения: `COURIER__BROKER__HOST` и т.п.
pub const ENV_PREFIX: &str = "COURIER";

/// Корневая конфигурация процесса.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub topology: TopologyConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Значения по умолчанию, переопределённые переменными окружения.
    pub fn load() -> Result<Self, SettingsError> {
        Self::build(None)
    }

    /// То же, что [`Settings::load`], плюс файл между значениями по умолчанию
    /// и окружением. Формат определяется по расширению (toml/json/yaml).
    /// Отсутствующий файл не считается ошибкой.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("broker.host", "localhost")?
            .set_default("broker.port", 5672)?
            .set_default("broker.virtual_host", "/")?
            .set_default("broker.username", "guest")?
            .set_default("broker.password", "guest")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.broker.validate()?;
        self.topology
            .validate()
            .map_err(|e| SettingsError::Topology(e.to_string()))?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;

    use super::*;
    use crate::topology::ExchangeKind;

    /// Тест проверяет, что без файла и окружения применяются значения по
    /// умолчанию.
    #[test]
    #[serial]
    fn test_load_defaults() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings.broker, BrokerSettings::default());
        assert!(settings.topology.exchanges.is_empty());
    }

    /// Тест проверяет чтение топологии из TOML-файла.
    #[test]
    #[serial]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[broker]
host = "rabbit.internal"
port = 5673

[[topology.exchanges]]
name = "orders"
type = "topic"
durable = true

[[topology.exchanges.queues]]
name = "orders.audit"
routing_key = "order.#"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.broker.host, "rabbit.internal");
        assert_eq!(settings.broker.port, 5673);
        assert_eq!(settings.broker.username, "guest");

        let orders = settings.topology.exchange("orders").unwrap();
        assert_eq!(orders.kind, ExchangeKind::Topic);
        assert!(orders.durable);
        assert_eq!(orders.queues[0].routing_key, "order.#");
    }

    #[test]
    #[serial]
    fn test_missing_file_is_not_an_error() {
        let settings = Settings::load_from("/nonexistent/courier.toml").unwrap();
        assert_eq!(settings.broker.port, 5672);
    }

    /// Тест проверяет, что окружение перекрывает файл и значения по
    /// умолчанию.
    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("COURIER__BROKER__HOST", "env-host");
        env::set_var("COURIER__BROKER__PORT", "6000");
        let result = Settings::load();
        env::remove_var("COURIER__BROKER__HOST");
        env::remove_var("COURIER__BROKER__PORT");

        let settings = result.unwrap();
        assert_eq!(settings.broker.host, "env-host");
        assert_eq!(settings.broker.port, 6000);
    }

    #[test]
    #[serial]
    fn test_invalid_topology_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"topology":{{"exchanges":[{{"name":"a"}},{{"name":"a"}}]}}}}"#
        )
        .unwrap();

        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Topology(_)));
    }
}
