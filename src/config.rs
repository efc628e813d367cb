//! Connection and buffer configuration.
//!
//! [`ConnectionConfig`] carries the tunables shared by every connection a
//! [`ConnectionFactory`](crate::factory::ConnectionFactory) creates. All
//! types derive `serde` traits so hosts can load them from their own
//! configuration format.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{connection::ConnectionKind, processing::ProcessingType};

/// Default idle timeout added to the clock on every read or write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default size of the window handed to the reactor for each read.
pub const DEFAULT_RECEIVE_CHUNK: usize = 8 * 1024;
/// Default period between liveness sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
/// Default time allowed for connections to close during shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffer capacities per connection kind and processing direction.
///
/// Mesh connections carry bulk cluster traffic and get larger buffers than
/// ordinary client connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPolicy {
    /// Decode buffer capacity for client connections.
    pub client_decode: usize,
    /// Encode buffer capacity for client connections.
    pub client_encode: usize,
    /// Decode buffer capacity for mesh connections.
    pub mesh_decode: usize,
    /// Encode buffer capacity for mesh connections.
    pub mesh_encode: usize,
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self {
            client_decode: 16 * 1024,
            client_encode: 16 * 1024,
            mesh_decode: 64 * 1024,
            mesh_encode: 64 * 1024,
        }
    }
}

impl BufferPolicy {
    /// Capacity for buffers serving `direction` on a `kind` connection.
    ///
    /// ```
    /// use brokerframe::{
    ///     config::BufferPolicy,
    ///     connection::ConnectionKind,
    ///     processing::ProcessingType,
    /// };
    ///
    /// let policy = BufferPolicy::default();
    /// assert!(
    ///     policy.capacity(ConnectionKind::Mesh, ProcessingType::Decoding)
    ///         > policy.capacity(ConnectionKind::Client, ProcessingType::Decoding)
    /// );
    /// ```
    #[must_use]
    pub fn capacity(&self, kind: ConnectionKind, direction: ProcessingType) -> usize {
        match (kind, direction) {
            (ConnectionKind::Client, ProcessingType::Decoding) => self.client_decode,
            (ConnectionKind::Client, ProcessingType::Encoding) => self.client_encode,
            (ConnectionKind::Mesh, ProcessingType::Decoding) => self.mesh_decode,
            (ConnectionKind::Mesh, ProcessingType::Encoding) => self.mesh_encode,
        }
    }
}

/// Tunables applied to each connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Node number stamped on every issued connection id.
    pub node_id: u32,
    /// Idle timeout refreshed by every read and write.
    pub timeout: Duration,
    /// Size of each receive window handed to the reactor.
    pub receive_chunk: usize,
    /// Period between liveness sweeps.
    pub sweep_interval: Duration,
    /// Time allowed for connections to close during a drain.
    pub drain_timeout: Duration,
    /// Buffer capacities per connection kind and direction.
    pub buffer_policy: BufferPolicy,
    /// Idle processing contexts kept for reuse.
    pub context_pool_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            timeout: DEFAULT_TIMEOUT,
            receive_chunk: DEFAULT_RECEIVE_CHUNK,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            buffer_policy: BufferPolicy::default(),
            context_pool_size: 64,
        }
    }
}

impl ConnectionConfig {
    /// Set the node number.
    #[must_use]
    pub fn node_id(mut self, node_id: u32) -> Self {
        self.node_id = node_id;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the receive window size. Zero is raised to one byte.
    #[must_use]
    pub fn receive_chunk(mut self, bytes: usize) -> Self {
        self.receive_chunk = bytes.max(1);
        self
    }

    /// Set the liveness sweep period. Zero is raised to one millisecond.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the drain timeout used at shutdown.
    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Replace the buffer policy.
    #[must_use]
    pub fn buffer_policy(mut self, policy: BufferPolicy) -> Self {
        self.buffer_policy = policy;
        self
    }

    /// Set how many idle processing contexts are retained.
    #[must_use]
    pub fn context_pool_size(mut self, size: usize) -> Self {
        self.context_pool_size = size;
        self
    }
}
