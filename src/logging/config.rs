use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Допустимые уровни логирования.
const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Ошибки инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Invalid filter directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("Log directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),
}

/// Формат вывода событий.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

/// Период ротации файлового лога.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Формат консоли; если не задан, используется общий `format`
    pub format: Option<LogFormat>,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub filename_prefix: String,
    pub rotation: RotationPolicy,
    pub format: LogFormat,
}

/// Поля, которыми помечается сообщение об инициализации.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CustomFields {
    pub instance_id: Option<String>,
    pub environment: Option<String>,
    pub hostname: Option<String>,
}

/// Конфигурация подсистемы логирования.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень (`trace` | `debug` | `info` | `warn` | `error` | `off`)
    pub level: String,
    pub format: LogFormat,
    /// Дополнительные директивы `EnvFilter`, например
    /// `courier::transport=debug`
    pub directives: Vec<String>,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
    pub custom_fields: CustomFields,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Переопределения из окружения: `COURIER_LOG_LEVEL`,
    /// `COURIER_LOG_FORMAT`, `COURIER_LOG_DIR`.
    ///
    /// Нераспознанный формат оставляет прежнее значение.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("COURIER_LOG_LEVEL") {
            self.level = level.trim().to_lowercase();
        }
        if let Ok(format) = std::env::var("COURIER_LOG_FORMAT") {
            if let Ok(format) = format.parse() {
                self.format = format;
            }
        }
        if let Ok(dir) = std::env::var("COURIER_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(LoggingError::InvalidLevel(self.level.clone()));
        }
        for directive in &self.directives {
            if let Err(e) = directive.parse::<tracing_subscriber::filter::Directive>() {
                return Err(LoggingError::InvalidDirective {
                    directive: directive.clone(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Создаёт каталог логов, если файловый вывод включён.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Строка для `EnvFilter`: базовый уровень и директивы через запятую.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = Vec::with_capacity(self.directives.len() + 1);
        parts.push(self.level.clone());
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }

    pub fn console_format(&self) -> LogFormat {
        self.console.format.unwrap_or(self.format)
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            directives: Vec::new(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
            custom_fields: CustomFields::default(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: None,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename_prefix: "courier.log".to_string(),
            rotation: RotationPolicy::default(),
            format: LogFormat::Json,
        }
    }
}

impl Default for CustomFields {
    fn default() -> Self {
        Self {
            instance_id: std::env::var("COURIER_INSTANCE_ID").ok(),
            environment: std::env::var("COURIER_ENV")
                .or_else(|_| std::env::var("RUST_ENV"))
                .ok(),
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
        }
    }
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(LoggingError::InvalidFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        };
        f.write_str(s)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
