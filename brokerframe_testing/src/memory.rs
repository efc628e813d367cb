//! Helpers for connections running over an in-memory reactor.

use std::{sync::Arc, time::Duration};

use brokerframe::{
    Client,
    Connection,
    ConnectionFactory,
    ConnectionKind,
    reactor::MemoryReactor,
};
use tokio::time::{Instant, sleep};

/// Create a connection over a fresh [`MemoryReactor`] and start it.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns the error from creating or starting the connection.
pub fn start_memory_connection(
    factory: &ConnectionFactory,
    kind: ConnectionKind,
    client: Arc<dyn Client>,
) -> brokerframe::Result<(Arc<Connection>, Arc<MemoryReactor>)> {
    let reactor = MemoryReactor::new();
    let connection = factory.create(reactor.clone(), kind, client)?;
    connection.start()?;
    Ok((connection, reactor))
}

/// Poll `condition` every millisecond until it holds or `limit` elapses.
///
/// Returns whether the condition was met.
pub async fn wait_for(mut condition: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(1)).await;
    }
}
