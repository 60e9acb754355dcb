//! CLI pingpong
//!
//! Коммандер и респондер командной строки: отправка команд устройству,
//! потоковый опрос температуры, запуск респондера против брокера и
//! демонстрационный режим в одном процессе.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use pingpong::{
    logging::{init_logging, LoggingHandle},
    session::Commander,
    Broker, MemoryTransport, Responder, ResponderConfig, Response, SessionChannel, SessionConfig,
    Settings, StreamingConfig, StreamingController, TcpTransport, TcpTransportConfig, Transport,
};
use pingpong_error::StackError;
use tracing::debug;

/// Аргументы CLI
#[derive(Parser)]
#[command(name = "pingpong-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "pingpong CLI - commander and responder for the ping/pong device protocol", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Путь к конфигурационному файлу
    #[arg(short, long, env = "PINGPONG_CONFIG", help = "Конфигурационный файл (toml/yaml/json)")]
    config: Option<PathBuf>,
    /// Адрес брокера
    #[arg(short, long, help = "Адрес брокера, перекрывает transport.address")]
    address: Option<String>,
    /// Таймаут ожидания ответа
    #[arg(long, help = "Таймаут ожидания ответа в миллисекундах")]
    timeout_ms: Option<u64>,
    /// Формат вывода ответов
    #[arg(long, global = true, value_enum, default_value = "pretty", help = "Формат вывода ответов")]
    output: OutputFormat,
    /// Подробный вывод (debug)
    #[arg(short, long, help = "Включить подробный вывод для отладки")]
    verbose: bool,
    /// Только ошибки
    #[arg(short = 'q', long, help = "Подавить логирование (только error)")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Формат вывода CLI
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Человекочитаемый формат
    Pretty,
    /// Один JSON-объект на строку
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Запустить респондер против брокера
    Respond,
    /// Установить цвет (RGBSet)
    Rgb {
        #[arg(help = "Красный канал")]
        r: i64,
        #[arg(help = "Зелёный канал")]
        g: i64,
        #[arg(help = "Синий канал")]
        b: i64,
    },
    /// Задать обороты и измерить вес (WeightMeasure)
    Weight {
        #[arg(help = "Новая скорость вращения, об/мин")]
        rpm: i64,
    },
    /// Прочитать температуру (TemperatureRead)
    #[command(alias = "temp")]
    Temperature,
    /// Периодически запрашивать температуру
    Stream {
        #[arg(long, help = "Интервал между запросами в миллисекундах")]
        interval_ms: Option<u64>,
        #[arg(long, default_value = "5000", help = "Длительность потока в миллисекундах")]
        duration_ms: u64,
    },
    /// Коммандер и респондер в одном процессе
    Demo {
        #[arg(long, default_value = "1", help = "Количество повторов сценария")]
        rounds: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Settings::load().context("Failed to load config")?,
    };
    if let Some(address) = &cli.address {
        settings.transport.address = address.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        settings.session.request_timeout_ms = timeout_ms;
    }
    if let Err(e) = settings.validate() {
        std::process::exit(report_error(&e.into(), cli.output));
    }

    let logging = init_cli_logging(&settings, cli.verbose, cli.quiet)?;

    let result = run(&cli, &settings).await;
    logging.shutdown();
    if let Err(e) = result {
        std::process::exit(report_error(&e, cli.output));
    }
    Ok(())
}

/// Печатает ошибку в выбранном формате и возвращает код выхода.
///
/// Ошибки протокола в режиме `json` выводятся в stdout одним объектом,
/// остальные идут в stderr текстом.
fn report_error(
    error: &anyhow::Error,
    output: OutputFormat,
) -> i32 {
    let stack = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StackError>());
    let json = match (stack, output) {
        (Some(stack), OutputFormat::Json) => serde_json::to_string(&stack.to_response()).ok(),
        _ => None,
    };
    match json {
        Some(json) => println!("{json}"),
        None => eprintln!("Error: {error:#}"),
    }
    stack.map_or(1, |stack| stack.status_code().exit_code())
}

async fn run(
    cli: &Cli,
    settings: &Settings,
) -> Result<()> {
    match &cli.command {
        Commands::Respond => respond(settings).await,
        Commands::Rgb { r, g, b } => {
            let commander = open_commander(settings).await?;
            let response = commander.request_rgb(*r, *g, *b).await;
            finish(commander, response, cli.output).await
        }
        Commands::Weight { rpm } => {
            let commander = open_commander(settings).await?;
            let response = commander.request_weight(*rpm).await;
            finish(commander, response, cli.output).await
        }
        Commands::Temperature => {
            let commander = open_commander(settings).await?;
            let response = commander.request_temperature().await;
            finish(commander, response, cli.output).await
        }
        Commands::Stream {
            interval_ms,
            duration_ms,
        } => {
            stream(
                settings,
                interval_ms.map(Duration::from_millis),
                Duration::from_millis(*duration_ms),
                cli.output,
            )
            .await
        }
        Commands::Demo { rounds } => demo(settings, *rounds, cli.output).await,
    }
}

/// Логи CLI идут в stderr; по умолчанию только предупреждения.
fn init_cli_logging(
    settings: &Settings,
    verbose: bool,
    quiet: bool,
) -> Result<LoggingHandle> {
    let mut config = settings.logging.clone();
    config.level = if quiet {
        "error".into()
    } else if verbose {
        "debug".into()
    } else {
        "warn".into()
    };
    config.console.with_target = verbose;
    init_logging(config).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

async fn connect_tcp(settings: &Settings) -> Result<Arc<dyn Transport>> {
    let config = TcpTransportConfig::from(&settings.transport);
    let transport = TcpTransport::new(config);
    transport
        .connect()
        .await
        .with_context(|| format!("Failed to connect to broker at {}", transport.address()))?;
    debug!(address = %transport.address(), "Connected to broker");
    Ok(Arc::new(transport))
}

async fn open_commander(settings: &Settings) -> Result<Commander> {
    let transport = connect_tcp(settings).await?;
    let commander = Commander::open(transport, SessionConfig::from(&settings.session)).await?;
    debug!(session_id = %commander.session_id(), "Session opened");
    Ok(commander)
}

async fn finish(
    commander: Commander,
    response: pingpong_error::PingPongResult<Response>,
    output: OutputFormat,
) -> Result<()> {
    let closed = commander.close().await;
    let response = response?;
    print_response(&response, output)?;
    closed?;
    if let Some(reason) = response.error_reason() {
        anyhow::bail!("device rejected command: {reason}");
    }
    Ok(())
}

async fn respond(settings: &Settings) -> Result<()> {
    let transport = connect_tcp(settings).await?;
    let dispatcher = Arc::new(settings.responder.dispatcher());
    let responder = Responder::start(
        transport.clone(),
        dispatcher,
        ResponderConfig::from(&settings.responder),
    )
    .await?;
    println!(
        "Responder attached to {} (scope: {:?}, policy: {:?}). Ctrl+C to stop.",
        settings.transport.address, settings.responder.device_scope, settings.responder.range_policy
    );

    let mut state = transport.watch_state();
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl+C")?,
        _ = async {
            while state.changed().await.is_ok() {
                if !transport.is_connected() {
                    break;
                }
            }
        } => eprintln!("Connection to broker lost"),
    }

    responder.stop().await?;
    let stats = responder.stats();
    println!(
        "received={} processed={} malformed={} dropped={} publish_failures={}",
        stats.received, stats.processed, stats.malformed, stats.dropped, stats.publish_failures
    );
    transport.disconnect().await?;
    Ok(())
}

async fn stream(
    settings: &Settings,
    interval: Option<Duration>,
    duration: Duration,
    output: OutputFormat,
) -> Result<()> {
    let transport = connect_tcp(settings).await?;
    let session = SessionChannel::open(transport, None, SessionConfig::from(&settings.session)).await?;
    let controller =
        StreamingController::for_session(&session, StreamingConfig::from(&settings.streaming));
    match interval {
        Some(interval) => controller.start(interval)?,
        None => controller.start_default()?,
    };

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            response = session.recv() => match response {
                Some(response) => print_response(&response, output)?,
                None => break,
            },
        }
    }

    controller.stop().await;
    // Ответы на последние запросы могут прийти уже после остановки.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for response in session.drain() {
        print_response(&response, output)?;
    }
    eprintln!(
        "published={} failures={} dropped_responses={}",
        controller.published(),
        controller.failures(),
        session.buffer().dropped()
    );
    session.close().await?;
    Ok(())
}

/// Сценарий «ping-pong» в одном процессе поверх `MemoryTransport`.
async fn demo(
    settings: &Settings,
    rounds: u32,
    output: OutputFormat,
) -> Result<()> {
    let broker = Arc::new(Broker::new(settings.broker.channel_capacity));
    let responder_side: Arc<dyn Transport> =
        Arc::new(MemoryTransport::connected(broker.clone()).await?);
    let commander_side: Arc<dyn Transport> = Arc::new(MemoryTransport::connected(broker).await?);

    let responder = Responder::start(
        responder_side,
        Arc::new(settings.responder.dispatcher()),
        ResponderConfig::from(&settings.responder),
    )
    .await?;
    let commander = Commander::open(commander_side, SessionConfig::from(&settings.session)).await?;

    for round in 0..rounds {
        let shade = (round as i64 * 40) % 256;
        print_response(&commander.request_rgb(shade, 255 - shade, 128).await?, output)?;
        print_response(&commander.request_weight(1000 + round as i64 * 250).await?, output)?;
        print_response(&commander.request_temperature().await?, output)?;
    }

    commander.close().await?;
    responder.stop().await?;
    let stats = responder.stats();
    eprintln!("processed={} malformed={}", stats.processed, stats.malformed);
    Ok(())
}

fn print_response(
    response: &Response,
    output: OutputFormat,
) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string(response)?),
        OutputFormat::Pretty => println!("{}", format_pretty(response)),
    }
    Ok(())
}

fn format_pretty(response: &Response) -> String {
    let color = atty::is(atty::Stream::Stdout);
    let header = format!("[{}] {}", response.command_type, response.session_id);
    let mut out = if !color {
        header
    } else if response.is_error() {
        header.red().bold().to_string()
    } else {
        header.green().bold().to_string()
    };

    let mut keys: Vec<_> = response.data.keys().collect();
    keys.sort();
    for key in keys {
        out.push_str(&format!("\n  {key}: {}", response.data[key.as_str()]));
    }
    out
}
