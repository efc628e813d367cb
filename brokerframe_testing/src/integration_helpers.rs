//! Shared helpers for integration testing a [`BrokerServer`] over TCP.
//!
//! Provides an echoing client, a helper to bind to an unused local port and a
//! handle that runs a server in the background until shut down.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use brokerframe::{
    BrokerServer,
    Client,
    Connection,
    ConnectionManager,
    ProcessingState,
    Processor,
    ServerError,
};
use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
};

use crate::TestResult;

/// Create a TCP listener bound to a free local port.
///
/// # Errors
///
/// Returns any IO error encountered while binding to an ephemeral localhost
/// port.
///
/// # Examples
///
/// ```rust,no_run
/// use brokerframe_testing::{TestResult, unused_listener};
///
/// fn example() -> TestResult {
///     let listener = unused_listener()?;
///     let addr = listener.local_addr()?;
///     assert!(addr.port() > 0);
///     Ok(())
/// }
/// ```
pub fn unused_listener() -> io::Result<StdTcpListener> {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr)
}

/// Client whose decode pipeline writes every received segment back.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoClient;

impl Client for EchoClient {
    fn on_bind(&self, connection: &Arc<Connection>) {
        connection
            .decoding()
            .add_last(Processor::new("echo", |conn, ctx| {
                if let Some(segment) = ctx.take_buffer() {
                    let written = conn.write(Bytes::copy_from_slice(&segment));
                    ctx.settings().provider().release_segment(segment);
                    if written.is_err() {
                        return ProcessingState::Failure;
                    }
                }
                ProcessingState::Stop
            }));
    }
}

/// Client factory producing [`EchoClient`]s.
#[must_use]
pub fn echo_client() -> Arc<dyn Client> { Arc::new(EchoClient) }

/// A server running on a background task.
pub struct ServerHandle {
    addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// Address the server listens on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Manager tracking the server's connections.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> { &self.manager }

    /// Trigger shutdown and wait for the server to drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the server task panicked or the server failed.
    pub async fn shutdown(self) -> TestResult {
        let _ = self.shutdown.send(());
        self.task.await??;
        Ok(())
    }
}

/// Bind `server` to an unused port and run it until the returned handle is
/// shut down.
///
/// Resolves once the accept workers are running.
///
/// # Errors
///
/// Returns an error if binding fails or the server exits before becoming
/// ready.
pub async fn spawn_server(server: BrokerServer) -> TestResult<ServerHandle> {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = server
        .bind_existing_listener(unused_listener()?)?
        .ready_signal(ready_tx);
    let addr = server.local_addr().ok_or("server missing local addr")?;
    let manager = Arc::clone(server.manager());
    let task = tokio::spawn(async move {
        server
            .run_with_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    ready_rx.await?;
    Ok(ServerHandle {
        addr,
        manager,
        shutdown: shutdown_tx,
        task,
    })
}

/// Connect to `addr`, send `payload` and read back as many bytes.
///
/// # Errors
///
/// Returns any IO error from connecting, writing or reading.
pub async fn round_trip(addr: SocketAddr, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(payload).await?;
    let mut reply = vec![0; payload.len()];
    stream.read_exact(&mut reply).await?;
    Ok(reply)
}
