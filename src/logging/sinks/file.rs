use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::{LoggingConfig, LoggingError, RotationPolicy},
    formatter::{self, FormatOptions},
};

/// Неблокирующий файловый слой с ротацией.
///
/// Guard нужно держать до завершения процесса: при его drop буфер
/// сбрасывается на диск.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> Result<(Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard), LoggingError>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(&config.log_dir)?;

    let dir = &config.log_dir;
    let prefix = &config.file.filename_prefix;
    let appender = match config.file.rotation {
        RotationPolicy::Daily => rolling::daily(dir, prefix),
        RotationPolicy::Hourly => rolling::hourly(dir, prefix),
        RotationPolicy::Never => rolling::never(dir, prefix),
    };
    let (writer, guard) = non_blocking(appender);

    let options = FormatOptions {
        with_ansi: false,
        with_target: true,
        with_thread_ids: config.console.with_thread_ids,
        with_line_numbers: config.console.with_line_numbers,
    };
    let layer = formatter::build_formatter(config.file.format, options, writer);

    Ok((layer, guard))
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::config::{FileConfig, LogFormat};

    /// Тест проверяет, что событие попадает в файл после drop guard.
    #[test]
    fn test_file_layer_writes_events() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = LoggingConfig {
            log_dir: tmp.path().to_path_buf(),
            file: FileConfig {
                enabled: true,
                filename_prefix: "test.log".into(),
                rotation: RotationPolicy::Never,
                format: LogFormat::Json,
            },
            ..Default::default()
        };

        let (layer, guard) = layer_with_config::<Registry>(&cfg).unwrap();
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(topic = "orders", "envelope published");
        });
        drop(guard);

        let content = std::fs::read_to_string(tmp.path().join("test.log")).unwrap();
        assert!(content.contains("envelope published"));
        assert!(content.contains("\"topic\":\"orders\""));
    }
}
