//! Коммандер и респондер в разных «процессах», связанные TCP-брокером.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use pingpong::{
    config::BrokerSettings,
    network::{BrokerServer, ShutdownSignal},
    Broker, Commander, ConnectionState, DeviceRegistry, DeviceScope, Dispatcher, RangePolicy,
    Responder, ResponderConfig, SessionConfig, TcpTransport, TcpTransportConfig, Transport,
};
use pingpong_error::StatusCode;
use serde_json::json;
use tokio::task::JoinHandle;

struct RunningBroker {
    addr: SocketAddr,
    shutdown: Arc<ShutdownSignal>,
    task: JoinHandle<Result<()>>,
}

async fn start_broker() -> Result<RunningBroker> {
    let settings = BrokerSettings {
        listen: "127.0.0.1:0".to_string(),
        shutdown_timeout_ms: 500,
        ..Default::default()
    };
    let shutdown = Arc::new(ShutdownSignal::new());
    let server = BrokerServer::bind(&settings, Arc::new(Broker::default()), shutdown.clone()).await?;
    let addr = server.local_addr()?;
    let task = tokio::spawn(server.run());
    Ok(RunningBroker {
        addr,
        shutdown,
        task,
    })
}

async fn connect(addr: SocketAddr) -> Result<Arc<dyn Transport>> {
    let transport = TcpTransport::new(TcpTransportConfig {
        address: addr.to_string(),
        connect_timeout: Duration::from_secs(2),
        ack_timeout: Duration::from_secs(2),
        ..Default::default()
    });
    transport.connect().await?;
    Ok(Arc::new(transport))
}

fn dispatcher() -> Arc<Dispatcher> {
    Arc::new(Dispatcher::with_seed(
        Arc::new(DeviceRegistry::new(DeviceScope::Shared)),
        RangePolicy::PassThrough,
        11,
    ))
}

/// Тест проверяет сквозной сценарий через TCP-брокер.
#[tokio::test]
async fn test_round_trip_over_tcp_broker() -> Result<()> {
    let broker = start_broker().await?;

    let dispatcher = dispatcher();
    let responder = Responder::start(
        connect(broker.addr).await?,
        dispatcher.clone(),
        ResponderConfig::default(),
    )
    .await?;
    let commander = Commander::open(connect(broker.addr).await?, SessionConfig::default()).await?;

    let response = commander.request_rgb(10, 20, 30).await?;
    assert_eq!(response.session_id, commander.session_id());
    assert_eq!(response.data["applied_values"], json!({"r": 10, "g": 20, "b": 30}));

    let response = commander.request_weight(2500).await?;
    assert_eq!(response.data["current_rpm"], json!(2500));
    assert_eq!(dispatcher.devices().snapshot("any").rpm, 2500);

    // Отправка без ожидания: ответ попадает в буфер сессии.
    commander.send_temperature_request().await?;
    let buffered = tokio::time::timeout(Duration::from_secs(2), commander.next_response())
        .await?
        .expect("buffered response");
    assert!(buffered.data.contains_key("current_temperature"));

    commander.close().await?;
    responder.stop().await?;
    assert_eq!(responder.stats().processed, 3);

    broker.shutdown.trigger();
    broker.task.await??;
    Ok(())
}

/// Тест проверяет, что остановка брокера переводит клиента в
/// `Disconnected`, а публикация после этого возвращает ошибку.
#[tokio::test]
async fn test_broker_shutdown_disconnects_clients() -> Result<()> {
    let broker = start_broker().await?;
    let transport = connect(broker.addr).await?;
    let mut state = transport.watch_state();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

    broker.shutdown.trigger();
    broker.task.await??;

    tokio::time::timeout(Duration::from_secs(2), async {
        while *state.borrow_and_update() != ConnectionState::Disconnected {
            state.changed().await.unwrap();
        }
    })
    .await?;

    let err = transport
        .publish("ping/command", bytes::Bytes::from_static(b"{}"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NotConnected);
    Ok(())
}

/// Тест проверяет ошибку подключения к порту без брокера.
#[tokio::test]
async fn test_connect_failure_is_reported() -> Result<()> {
    // Занимаем порт и сразу освобождаем, чтобы на нём никого не было.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };
    let transport = TcpTransport::new(TcpTransportConfig {
        address: addr.to_string(),
        connect_timeout: Duration::from_millis(500),
        ..Default::default()
    });

    let err = transport.connect().await.unwrap_err();
    assert!(err.status_code().is_transport_error());
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    Ok(())
}
