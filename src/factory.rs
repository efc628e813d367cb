//! Construction of connections.
//!
//! [`ConnectionFactory`] stamps each connection with a fresh id, gives each
//! processing direction its own buffer provider sized by the
//! [`BufferPolicy`](crate::config::BufferPolicy), shares one context pool
//! across every connection it creates and binds the client.

use std::{fmt, sync::Arc};

use log::debug;

use crate::{
    buffer::{BufferProvider, PooledBufferProvider},
    config::ConnectionConfig,
    connection::{Connection, ConnectionKind, ConnectionParts},
    error::Result,
    filter::ConnectionFilter,
    hooks::Client,
    id::IdGenerator,
    manager::ConnectionManager,
    processing::{ContextPool, ProcessingSettings, ProcessingType},
    reactor::Reactor,
};

/// Builds connections sharing one configuration.
pub struct ConnectionFactory {
    ids: Arc<IdGenerator>,
    config: ConnectionConfig,
    contexts: Arc<ContextPool>,
    filter: Option<Arc<dyn ConnectionFilter>>,
    manager: Option<Arc<ConnectionManager>>,
}

impl ConnectionFactory {
    /// Create a factory issuing ids from `ids`.
    #[must_use]
    pub fn new(ids: Arc<IdGenerator>, config: ConnectionConfig) -> Self {
        let contexts = Arc::new(ContextPool::new(config.context_pool_size));
        Self {
            ids,
            config,
            contexts,
            filter: None,
            manager: None,
        }
    }

    /// Run `filter` on every connection before it opens.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn ConnectionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Register every created connection with `manager`.
    #[must_use]
    pub fn with_manager(mut self, manager: Arc<ConnectionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Configuration applied to new connections.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig { &self.config }

    /// Manager new connections are registered with, if any.
    #[must_use]
    pub fn manager(&self) -> Option<&Arc<ConnectionManager>> { self.manager.as_ref() }

    /// Context pool shared by every connection from this factory.
    #[must_use]
    pub fn contexts(&self) -> &Arc<ContextPool> { &self.contexts }

    fn settings(&self, kind: ConnectionKind, direction: ProcessingType) -> ProcessingSettings {
        let capacity = self.config.buffer_policy.capacity(kind, direction);
        let provider: Arc<dyn BufferProvider> = Arc::new(PooledBufferProvider::new(capacity));
        ProcessingSettings::new(direction, provider)
    }

    /// Create a connection over `reactor` and bind `client` to it.
    ///
    /// The connection is returned in
    /// [`ConnectionState::Creating`](crate::connection::ConnectionState::Creating);
    /// call [`Connection::start`] to begin.
    ///
    /// # Errors
    ///
    /// Propagates the error from binding the client.
    pub fn create(
        &self,
        reactor: Arc<dyn Reactor>,
        kind: ConnectionKind,
        client: Arc<dyn Client>,
    ) -> Result<Arc<Connection>> {
        let connection = Arc::new(Connection::new(ConnectionParts {
            id: self.ids.next_id(),
            kind,
            reactor,
            decoding: self.settings(kind, ProcessingType::Decoding),
            encoding: self.settings(kind, ProcessingType::Encoding),
            contexts: Arc::clone(&self.contexts),
            filter: self.filter.clone(),
            timeout: self.config.timeout,
            receive_chunk: self.config.receive_chunk,
        }));
        connection.bind_client(client)?;
        if let Some(manager) = &self.manager {
            manager.register(&connection);
        }
        debug!(
            "connection created: id={}, kind={kind:?}, peer={:?}",
            connection.id(),
            connection.remote_address()
        );
        Ok(connection)
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("node", &self.ids.node())
            .field("config", &self.config)
            .field("filter", &self.filter.is_some())
            .field("manager", &self.manager.is_some())
            .finish_non_exhaustive()
    }
}
