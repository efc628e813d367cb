//! Connection identity.
//!
//! A [`ConnectionId`] pairs the broker node number with a node-local counter.
//! The counter lives in an explicit [`IdGenerator`] that is shared by the
//! connection factory. It is seeded from the wall clock so identifiers issued
//! after a restart do not collide with those handed out before it.

use std::{
    fmt,
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Identifier assigned to a connection.
///
/// Ordering compares `node` first and then `local`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    node: u32,
    local: i64,
}

impl ConnectionId {
    /// Create a [`ConnectionId`] from its parts.
    #[must_use]
    pub const fn new(node: u32, local: i64) -> Self { Self { node, local } }

    /// Node number of the broker that accepted the connection.
    #[must_use]
    pub const fn node(&self) -> u32 { self.node }

    /// Node-local sequence number.
    #[must_use]
    pub const fn local(&self) -> i64 { self.local }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:016x}", self.node, self.local)
    }
}

/// Issues [`ConnectionId`]s for a single node.
///
/// Share one instance per process behind an `Arc`; every call to
/// [`IdGenerator::next_id`] performs a single atomic increment.
///
/// ```
/// use brokerframe::IdGenerator;
///
/// let ids = IdGenerator::with_seed(7, 100);
/// let first = ids.next_id();
/// let second = ids.next_id();
/// assert_eq!(first.node(), 7);
/// assert!(first < second);
/// ```
#[derive(Debug)]
pub struct IdGenerator {
    node: u32,
    last: AtomicI64,
}

impl IdGenerator {
    /// Create a generator for `node`, seeded from the current wall-clock ticks.
    #[must_use]
    pub fn new(node: u32) -> Self { Self::with_seed(node, wall_clock_ticks()) }

    /// Create a generator whose first identifier is `seed + 1`.
    #[must_use]
    pub const fn with_seed(node: u32, seed: i64) -> Self {
        Self {
            node,
            last: AtomicI64::new(seed),
        }
    }

    /// Node number stamped on every issued identifier.
    #[must_use]
    pub const fn node(&self) -> u32 { self.node }

    /// Issue the next identifier.
    pub fn next_id(&self) -> ConnectionId {
        let local = self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        ConnectionId::new(self.node, local)
    }
}

/// Wall-clock time in 100ns ticks since the Unix epoch.
fn wall_clock_ticks() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_nanos() / 100).unwrap_or(i64::MAX / 2))
        .unwrap_or_default()
}
