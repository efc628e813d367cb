//! Accept loop feeding new sockets to the connection factory.

use std::{
    fmt,
    io,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use async_trait::async_trait;
use log::{error, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::{Duration, sleep},
};
use tokio_util::sync::CancellationToken;

use super::{BackoffConfig, ClientFactory};
use crate::{
    connection::ConnectionKind,
    factory::ConnectionFactory,
    metrics,
    panic::format_panic,
    reactor::{Reactor, TcpReactor},
};

/// Source of incoming sockets consumed by the accept loop.
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Everything an accept worker needs to turn a socket into a connection.
#[derive(Clone)]
pub(crate) struct AcceptContext {
    pub(crate) factory: Arc<ConnectionFactory>,
    pub(crate) clients: ClientFactory,
    pub(crate) kind: ConnectionKind,
    pub(crate) shutdown: CancellationToken,
    pub(crate) backoff: BackoffConfig,
}

impl fmt::Debug for AcceptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptContext")
            .field("kind", &self.kind)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Accept sockets until `ctx.shutdown` fires.
///
/// Accept failures back off exponentially; a success resets the delay.
pub(crate) async fn accept_loop<L>(listener: Arc<L>, ctx: AcceptContext)
where
    L: AcceptListener + 'static,
{
    let backoff = ctx.backoff.normalized();
    let mut delay = backoff.initial_delay;
    while let Some(next) = accept_iteration(&listener, &ctx, &backoff, delay).await {
        delay = next;
    }
}

#[expect(
    clippy::integer_division_remainder_used,
    reason = "tokio::select! expands to modulus internally"
)]
async fn accept_iteration<L>(
    listener: &Arc<L>,
    ctx: &AcceptContext,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
{
    select! {
        biased;

        () = ctx.shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, peer)) => {
                open_connection(stream, peer, ctx);
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                select! {
                    biased;

                    () = ctx.shutdown.cancelled() => return None,
                    () = sleep(delay) => {}
                }
                backoff.next_delay(delay)
            }
        }),
    }
}

/// Wrap `stream` in a reactor, build a connection for it and start it.
///
/// A panicking client factory is logged and the socket closed; the accept
/// loop carries on.
pub(crate) fn open_connection(stream: TcpStream, peer: SocketAddr, ctx: &AcceptContext) {
    let reactor = TcpReactor::new(stream);
    let raw: Arc<dyn Reactor> = reactor.clone();
    let created = panic::catch_unwind(AssertUnwindSafe(|| {
        ctx.factory.create(raw, ctx.kind, (ctx.clients)())
    }));
    match created {
        Ok(Ok(connection)) => {
            if let Err(e) = connection.start() {
                warn!("failed to start connection: peer={peer}, error={e}");
            }
        }
        Ok(Err(e)) => {
            warn!("failed to create connection: peer={peer}, error={e}");
            reactor.close();
        }
        Err(panic) => {
            metrics::inc_errors();
            let panic_msg = format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("client factory panicked: panic={panic_msg}, peer={peer}");
            tracing::error!(panic = %panic_msg, %peer, "client factory panicked");
            reactor.close();
        }
    }
}
