//! Integration coverage for the `brokerframe_testing` helpers.

use std::{sync::Arc, time::Duration};

use brokerframe::{BrokerServer, ConnectionConfig, ConnectionFactory, ConnectionKind, IdGenerator};
use brokerframe_testing::{
    EchoClient,
    TestResult,
    echo_client,
    recv_expect,
    round_trip,
    spawn_server,
    start_memory_connection,
    unused_listener,
    wait_for,
};
use tokio::sync::mpsc;

#[test]
fn unused_listener_binds_an_ephemeral_port() -> TestResult {
    let listener = unused_listener()?;
    assert!(listener.local_addr()?.port() > 0);
    Ok(())
}

#[tokio::test]
async fn spawned_server_echoes_and_shuts_down() -> TestResult {
    let server = spawn_server(BrokerServer::new(ConnectionConfig::default(), echo_client).workers(1)).await?;

    assert_eq!(round_trip(server.addr(), b"ping").await?, b"ping");

    server.shutdown().await
}

#[tokio::test]
async fn memory_connection_echoes_through_the_reactor() -> TestResult {
    let factory = ConnectionFactory::new(Arc::new(IdGenerator::new(9)), ConnectionConfig::default());
    let (conn, reactor) =
        start_memory_connection(&factory, ConnectionKind::Client, Arc::new(EchoClient))?;

    assert!(reactor.deliver(b"marco"));
    assert!(wait_for(|| reactor.written().as_ref() == b"marco", Duration::from_secs(5)).await);

    let (tx, mut rx) = mpsc::channel(1);
    conn.on_disconnect(move |c| {
        let _ = tx.try_send(c.id());
    });
    conn.stop().await;
    assert_eq!(recv_expect!(rx.recv()), conn.id());
    Ok(())
}
