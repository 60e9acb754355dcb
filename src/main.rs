//! Сервер брокера pingpong.
//!
//! Поднимает TCP-брокер publish/subscribe. С `--with-responder` в том же
//! процессе запускается респондер, подключённый к брокеру напрямую.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use pingpong::{
    logging::init_logging,
    network::{
        banner::{print_banner, print_startup_log},
        BrokerServer, ShutdownSignal,
    },
    Broker, MemoryTransport, Responder, ResponderConfig, Settings, Transport,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pingpong")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "pingpong broker - publish/subscribe server for the ping/pong device protocol", long_about = None)]
struct Args {
    /// Путь к конфигурационному файлу
    #[arg(short, long, env = "PINGPONG_CONFIG", help = "Конфигурационный файл (toml/yaml/json)")]
    config: Option<PathBuf>,
    /// Адрес прослушивания, перекрывает `broker.listen`
    #[arg(short, long, help = "Адрес прослушивания, например 127.0.0.1:6380")]
    listen: Option<String>,
    /// Запустить респондер в этом же процессе
    #[arg(long, help = "Запустить встроенный респондер")]
    with_responder: bool,
    /// Зерно генератора респондера
    #[arg(long, help = "Фиксированное зерно генератора для воспроизводимых ответов")]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Settings::load().context("Failed to load config")?,
    };
    if let Some(listen) = args.listen {
        settings.broker.listen = listen;
    }
    if args.seed.is_some() {
        settings.responder.seed = args.seed;
    }
    settings.validate()?;

    let logging = init_logging(settings.logging.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let responder_label = if args.with_responder {
        "in-process"
    } else {
        "external"
    };
    print_banner(&settings.broker.listen, responder_label);

    let broker = Arc::new(Broker::new(settings.broker.channel_capacity));
    let shutdown = Arc::new(ShutdownSignal::new());
    let server = BrokerServer::bind(&settings.broker, broker.clone(), shutdown.clone()).await?;
    print_startup_log();

    let responder = if args.with_responder {
        let transport: Arc<dyn Transport> =
            Arc::new(MemoryTransport::connected(broker.clone()).await?);
        let dispatcher = Arc::new(settings.responder.dispatcher());
        Some(
            Responder::start(
                transport,
                dispatcher,
                ResponderConfig::from(&settings.responder),
            )
            .await?,
        )
    } else {
        None
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C, shutting down");
            shutdown.trigger();
        });
    }

    server.run().await?;

    if let Some(responder) = responder {
        responder.stop().await?;
    }
    info!(
        published = broker.publish_count.load(std::sync::atomic::Ordering::Relaxed),
        "Broker stopped"
    );
    logging.shutdown_async(Duration::from_secs(2)).await;
    Ok(())
}
