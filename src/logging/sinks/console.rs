use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::LoggingConfig,
    formatter::{self, FormatOptions},
};

/// Консольный слой с оформлением из конфигурации.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let options = FormatOptions {
        with_ansi: config.console.with_ansi,
        with_target: config.console.with_target,
        with_thread_ids: config.console.with_thread_ids,
        with_line_numbers: config.console.with_line_numbers,
    };
    formatter::build_formatter(
        config.console_format(),
        options,
        std::io::stdout,
    )
}
