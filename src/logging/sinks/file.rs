use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{
    config::LoggingConfig,
    formatter::{self, FormatOptions},
};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// Возвращённый guard нужно держать до завершения процесса.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> (Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = rolling::daily(&config.log_dir, &config.file.filename);
    let (writer, guard) = non_blocking(appender);

    let options = FormatOptions {
        with_ansi: false,
        with_target: true,
        with_thread_ids: config.console.with_thread_ids,
        with_line_numbers: config.console.with_line_numbers,
    };
    let layer = formatter::build_formatter(config.file.format, options, writer);
    (layer, guard)
}
