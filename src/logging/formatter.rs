use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{ConsoleConfig, LogFormat};

/// Флаги форматирования, общие для всех sink'ов.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

impl From<&ConsoleConfig> for FormatOptions {
    fn from(console: &ConsoleConfig) -> Self {
        Self {
            with_ansi: console.with_ansi,
            with_target: console.with_target,
            with_thread_ids: console.with_thread_ids,
            with_line_numbers: console.with_line_numbers,
        }
    }
}

/// Собирает fmt-слой для заданного формата и writer'а.
///
/// Возвращаем boxed trait-объект, чтобы стереть конкретный тип формата
/// (json/pretty/compact).
pub fn build_formatter<S, W>(
    format: LogFormat,
    options: FormatOptions,
    writer: W,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    // Флаги задаются после `event_format`: он заменяет формат целиком.
    match format {
        LogFormat::Json => Box::new(
            fmt::layer()
                .event_format(fmt::format().json().with_current_span(true))
                .with_writer(writer)
                .with_ansi(options.with_ansi)
                .with_target(options.with_target)
                .with_thread_names(options.with_thread_ids)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers),
        ),
        LogFormat::Pretty => Box::new(
            fmt::layer()
                .event_format(fmt::format().pretty())
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer)
                .with_ansi(options.with_ansi)
                .with_target(options.with_target)
                .with_thread_names(options.with_thread_ids)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers),
        ),
        LogFormat::Compact => Box::new(
            fmt::layer()
                .event_format(fmt::format().compact())
                .with_writer(writer)
                .with_ansi(options.with_ansi)
                .with_target(options.with_target)
                .with_thread_names(options.with_thread_ids)
                .with_thread_ids(options.with_thread_ids)
                .with_line_number(options.with_line_numbers),
        ),
    }
}
