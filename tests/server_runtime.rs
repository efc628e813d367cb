//! End-to-end tests for [`BrokerServer`] over real sockets.

use std::{sync::Arc, time::Duration};

use brokerframe::{BrokerServer, Client, ConnectionConfig, ConnectionKind};
use brokerframe_testing::{
    LoggerHandle,
    TestResult,
    echo_client,
    logger,
    round_trip,
    spawn_server,
    wait_for,
};
use rstest::rstest;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinSet,
};

fn echo_server(config: ConnectionConfig) -> BrokerServer {
    BrokerServer::new(config, echo_client).workers(2)
}

#[rstest]
#[case::client(ConnectionKind::Client)]
#[case::mesh(ConnectionKind::Mesh)]
#[tokio::test]
async fn echoes_received_bytes(#[case] kind: ConnectionKind) -> TestResult {
    let server = spawn_server(echo_server(ConnectionConfig::default()).kind(kind)).await?;

    let reply = round_trip(server.addr(), b"hello broker").await?;

    assert_eq!(reply, b"hello broker");
    server.shutdown().await
}

#[tokio::test]
async fn serves_concurrent_clients() -> TestResult {
    let server = spawn_server(echo_server(ConnectionConfig::default())).await?;
    let addr = server.addr();

    let mut clients = JoinSet::new();
    for i in 0..8_u8 {
        clients.spawn(async move {
            let payload = vec![i; 64 + usize::from(i)];
            let reply = round_trip(addr, &payload).await?;
            Ok::<bool, std::io::Error>(reply == payload)
        });
    }
    while let Some(result) = clients.join_next().await {
        assert!(result??, "echo mismatch");
    }

    server.shutdown().await
}

#[tokio::test]
async fn disconnecting_peer_is_unregistered() -> TestResult {
    let server = spawn_server(echo_server(ConnectionConfig::default())).await?;
    let manager = Arc::clone(server.manager());

    round_trip(server.addr(), b"bye").await?;

    assert!(wait_for(|| manager.is_empty(), Duration::from_secs(5)).await);
    server.shutdown().await
}

#[tokio::test]
async fn shutdown_closes_open_connections() -> TestResult {
    let server = spawn_server(echo_server(ConnectionConfig::default())).await?;
    let manager = Arc::clone(server.manager());
    let mut stream = TcpStream::connect(server.addr()).await?;
    stream.write_all(b"x").await?;
    let mut byte = [0_u8; 1];
    stream.read_exact(&mut byte).await?;
    assert_eq!(manager.len(), 1);

    server.shutdown().await?;

    assert!(manager.is_empty());
    assert_eq!(stream.read(&mut byte).await?, 0);
    Ok(())
}

#[tokio::test]
async fn idle_clients_are_swept() -> TestResult {
    let config = ConnectionConfig::default()
        .timeout(Duration::from_millis(100))
        .sweep_interval(Duration::from_millis(20));
    let server = spawn_server(echo_server(config)).await?;
    let manager = Arc::clone(server.manager());
    let mut stream = TcpStream::connect(server.addr()).await?;

    assert!(wait_for(|| manager.len() == 1, Duration::from_secs(5)).await);
    assert!(wait_for(|| manager.is_empty(), Duration::from_secs(5)).await);
    let mut byte = [0_u8; 1];
    assert_eq!(stream.read(&mut byte).await?, 0);

    server.shutdown().await
}

#[rstest]
#[tokio::test]
async fn panicking_client_factory_drops_the_socket(mut logger: LoggerHandle) -> TestResult {
    let server = BrokerServer::new(ConnectionConfig::default(), || -> Arc<dyn Client> {
        panic!("client factory exploded")
    })
    .workers(1);
    let server = spawn_server(server).await?;
    let mut stream = TcpStream::connect(server.addr()).await?;

    let mut byte = [0_u8; 1];
    let read = stream.read(&mut byte).await;

    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(server.manager().is_empty());
    assert!(logger.contains("client factory panicked"));
    server.shutdown().await
}
