use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, select};
use tracing::{error, info, warn};

use super::{ConnectionConfig, ConnectionManager, ShutdownSignal};
use crate::{config::BrokerSettings, Broker};

/// TCP-сервер брокера: принимает соединения и раздаёт сообщения общего
/// [`Broker`] клиентам.
pub struct BrokerServer {
    listener: TcpListener,
    broker: Arc<Broker>,
    manager: Arc<ConnectionManager>,
    shutdown: Arc<ShutdownSignal>,
    drain_timeout: Duration,
}

impl BrokerServer {
    pub async fn bind(
        settings: &BrokerSettings,
        broker: Arc<Broker>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&settings.listen)
            .await
            .with_context(|| format!("Failed to bind broker to {}", settings.listen))?;
        let manager = Arc::new(ConnectionManager::new(
            ConnectionConfig::from(settings),
            shutdown.clone(),
        ));
        Ok(Self {
            listener,
            broker,
            manager,
            shutdown,
            drain_timeout: settings.shutdown_timeout(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Цикл приёма соединений до срабатывания сигнала остановки.
    pub async fn run(self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "Broker listening");

        loop {
            select! {
                _ = self.shutdown.wait() => break,
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    let manager = self.manager.clone();
                    let broker = self.broker.clone();
                    tokio::spawn(async move {
                        if let Err(e) = manager.handle_connection(socket, peer, broker).await {
                            error!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
            }
        }

        info!(%addr, "Broker stopping");
        self.manager.shutdown();
        self.manager.wait_for_shutdown(self.drain_timeout).await
    }
}

/// Привязывает сервер к адресу из настроек и обслуживает его до остановки.
pub async fn run_broker(
    settings: &BrokerSettings,
    broker: Arc<Broker>,
    shutdown: Arc<ShutdownSignal>,
) -> Result<()> {
    BrokerServer::bind(settings, broker, shutdown)
        .await?
        .run()
        .await
}

impl From<&BrokerSettings> for ConnectionConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            idle_timeout: Duration::from_millis(settings.idle_timeout_ms),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            outbound_capacity: settings.channel_capacity,
            ..Default::default()
        }
    }
}
