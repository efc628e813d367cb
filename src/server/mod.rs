//! Tokio TCP server producing managed connections.
//!
//! `BrokerServer` spawns worker tasks that accept sockets, wrap each in a
//! [`TcpReactor`](crate::reactor::TcpReactor), build a connection through
//! the [`ConnectionFactory`] and start it. A liveness sweeper runs alongside.
//! On shutdown the server stops accepting, asks every connection to stop,
//! waits up to the drain timeout and aborts whatever is left.

mod accept;
mod backoff;
mod error;

use std::{
    fmt,
    future::Future,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use accept::{AcceptContext, accept_loop};
pub use backoff::BackoffConfig;
pub use error::ServerError;
use log::{info, warn};
use tokio::{net::TcpListener, select, signal, sync::oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::ConnectionConfig,
    connection::ConnectionKind,
    factory::ConnectionFactory,
    filter::ConnectionFilter,
    hooks::Client,
    id::IdGenerator,
    manager::ConnectionManager,
};

/// Produces the client bound to each accepted connection.
pub type ClientFactory = Arc<dyn Fn() -> Arc<dyn Client> + Send + Sync>;

/// TCP server accepting connections of one [`ConnectionKind`].
pub struct BrokerServer {
    config: ConnectionConfig,
    clients: ClientFactory,
    filter: Option<Arc<dyn ConnectionFilter>>,
    manager: Arc<ConnectionManager>,
    kind: ConnectionKind,
    workers: usize,
    backoff: BackoffConfig,
    listener: Option<Arc<TcpListener>>,
    ready_tx: Option<oneshot::Sender<()>>,
}

impl BrokerServer {
    /// Create a server binding a client from `clients` to every connection.
    ///
    /// The worker count defaults to the number of available CPU cores.
    #[must_use]
    pub fn new<F>(config: ConnectionConfig, clients: F) -> Self
    where
        F: Fn() -> Arc<dyn Client> + Send + Sync + 'static,
    {
        let workers = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Self {
            config,
            clients: Arc::new(clients),
            filter: None,
            manager: ConnectionManager::new(),
            kind: ConnectionKind::Client,
            workers,
            backoff: BackoffConfig::default(),
            listener: None,
            ready_tx: None,
        }
    }

    /// Accept connections of `kind`.
    #[must_use]
    pub fn kind(mut self, kind: ConnectionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the number of accept workers. Zero is raised to one.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count.max(1);
        self
    }

    /// Run `filter` on every accepted connection before it opens.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn ConnectionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Replace the accept back-off policy.
    #[must_use]
    pub fn accept_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalized();
        self
    }

    /// Signal `tx` once the accept workers are running.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Manager tracking this server's connections.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> { &self.manager }

    /// Address of the bound listener.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Bind to `addr`. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the socket cannot be bound.
    pub fn bind(self, addr: SocketAddr) -> Result<Self, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Use an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if configuring the listener fails.
    pub fn bind_existing_listener(
        mut self,
        std_listener: StdTcpListener,
    ) -> Result<Self, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        self.listener = Some(Arc::new(listener));
        Ok(self)
    }

    /// Run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotBound`] if no listener was bound.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves, then drain.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotBound`] if no listener was bound.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub async fn run_with_shutdown<S>(self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let BrokerServer {
            config,
            clients,
            filter,
            manager,
            kind,
            workers,
            backoff,
            listener,
            ready_tx,
        } = self;
        let listener = listener.ok_or(ServerError::NotBound)?;
        let drain_timeout = config.drain_timeout;
        let sweep_interval = config.sweep_interval;
        let ids = Arc::new(IdGenerator::new(config.node_id));
        let mut factory = ConnectionFactory::new(ids, config).with_manager(Arc::clone(&manager));
        if let Some(filter) = filter {
            factory = factory.with_filter(filter);
        }

        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let ctx = AcceptContext {
            factory: Arc::new(factory),
            clients,
            kind,
            shutdown: shutdown_token.clone(),
            backoff,
        };
        for _ in 0..workers {
            tracker.spawn(accept_loop(Arc::clone(&listener), ctx.clone()));
        }
        let sweeper = manager.spawn_sweeper(sweep_interval, shutdown_token.clone());
        info!(
            "server listening: addr={:?}, workers={workers}, kind={kind:?}",
            listener.local_addr().ok()
        );

        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("Failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        let _ = sweeper.await;
        drain(&manager, drain_timeout).await;
        Ok(())
    }
}

/// Stop every connection, aborting those still open after `timeout`.
async fn drain(manager: &ConnectionManager, timeout: std::time::Duration) {
    manager.walk_connections_and_close();
    if manager.wait_for_connection_close(timeout).await {
        info!("all connections closed");
        return;
    }
    let remaining = manager.ids();
    warn!(
        "drain timed out, aborting connections: count={}",
        remaining.len()
    );
    for id in remaining {
        if let Some(connection) = manager.get(id) {
            connection.abort();
        }
    }
}

impl fmt::Debug for BrokerServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerServer")
            .field("kind", &self.kind)
            .field("workers", &self.workers)
            .field("backoff", &self.backoff)
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}
