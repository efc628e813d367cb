//! Registry of live connections.
//!
//! [`ConnectionManager`] keeps every registered connection until it is
//! disposed, sweeps them for liveness on a timer and drives a graceful drain
//! at shutdown.
//!
//! Iteration always snapshots the map first. Closing a connection may
//! dispose it synchronously, and disposal unregisters from this map, so no
//! shard lock may be held while a connection is touched.

use std::{fmt, sync::Arc, time::Duration};

use dashmap::DashMap;
use log::{debug, info};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    connection::{CloseReason, Connection, ConnectionState},
    id::ConnectionId,
};

/// Concurrent map of live connections keyed by [`ConnectionId`].
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    live: watch::Sender<usize>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            live: watch::channel(0).0,
        }
    }
}

impl ConnectionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Track `connection` until it is disposed.
    ///
    /// Returns `false` if a connection with the same id is already tracked
    /// or `connection` has already been disposed.
    pub fn register(self: &Arc<Self>, connection: &Arc<Connection>) -> bool {
        if connection.is_disposed() {
            return false;
        }
        let inserted = match self.connections.entry(connection.id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(connection));
                true
            }
        };
        if inserted {
            connection.attach_manager(self);
            self.publish_count();
            // Disposal may have raced the insert and missed the entry.
            if connection.is_disposed() {
                self.unregister(connection.id());
            }
        }
        inserted
    }

    /// Stop tracking the connection with `id`.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            self.publish_count();
        }
        removed
    }

    /// Look up a tracked connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize { self.connections.len() }

    /// Whether no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.connections.is_empty() }

    /// Ids of every tracked connection.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> { self.connections.iter().map(|e| *e.key()).collect() }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn publish_count(&self) { self.live.send_replace(self.connections.len()); }

    /// Close every open connection that failed its liveness check.
    ///
    /// Returns how many connections were told to close.
    pub fn check_all_alive(&self) -> usize {
        let mut closed = 0;
        for connection in self.snapshot() {
            if connection.state() == ConnectionState::Open && !connection.check_alive() {
                debug!("closing idle connection: id={}", connection.id());
                connection.close(CloseReason::ConnectionKeepAlive);
                closed += 1;
            }
        }
        closed
    }

    /// Run [`check_all_alive`](Self::check_all_alive) every `interval`
    /// until `shutdown` fires.
    #[must_use]
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;

                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = manager.check_all_alive();
                        if closed > 0 {
                            info!("liveness sweep closed connections: count={closed}");
                        }
                    }
                }
            }
        })
    }

    /// Ask every tracked connection to stop.
    pub fn walk_connections_and_close(&self) {
        let connections = self.snapshot();
        info!("closing all connections: count={}", connections.len());
        for connection in connections {
            connection.request_stop();
        }
    }

    /// Wait until no connections are tracked or `timeout` elapses.
    ///
    /// Returns `true` if every connection went away in time.
    pub async fn wait_for_connection_close(&self, timeout: Duration) -> bool {
        let mut live = self.live.subscribe();
        let drained = async move {
            let _ = live.wait_for(|count| *count == 0).await;
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .finish()
    }
}
