//! Helpers shared by unit tests that need a live connection.

use std::sync::{Arc, Mutex};

use tokio::{
    sync::mpsc,
    time::{Duration, sleep, timeout},
};

use crate::{
    buffer::{BufferProvider, PooledBufferProvider},
    config::ConnectionConfig,
    connection::{Connection, ConnectionKind, ConnectionParts},
    factory::ConnectionFactory,
    hooks::Client,
    id::IdGenerator,
    processing::{ContextPool, ProcessingSettings, ProcessingState, ProcessingType, Processor},
    reactor::{MemoryReactor, Reactor},
};

/// Factory with a fixed id seed so identifiers are predictable.
pub(crate) fn factory(config: ConnectionConfig) -> ConnectionFactory {
    ConnectionFactory::new(Arc::new(IdGenerator::with_seed(config.node_id, 0)), config)
}

/// Create a connection over a fresh [`MemoryReactor`].
pub(crate) fn connect(
    factory: &ConnectionFactory,
    kind: ConnectionKind,
    client: Arc<dyn Client>,
) -> (Arc<Connection>, Arc<MemoryReactor>) {
    let reactor = MemoryReactor::new();
    let connection = factory
        .create(reactor.clone(), kind, client)
        .expect("create connection");
    (connection, reactor)
}

/// A client connection with default configuration and no client callbacks.
pub(crate) fn connection() -> (Arc<Connection>, Arc<MemoryReactor>) {
    connect(
        &factory(ConnectionConfig::default()),
        ConnectionKind::Client,
        Arc::new(()),
    )
}

/// A client connection whose decode direction draws from `provider`.
pub(crate) fn pooled_connection(
    provider: &Arc<PooledBufferProvider>,
) -> (Arc<Connection>, Arc<MemoryReactor>) {
    let config = ConnectionConfig::default();
    let memory = MemoryReactor::new();
    let reactor: Arc<dyn Reactor> = memory.clone();
    let decode: Arc<dyn BufferProvider> = provider.clone();
    let encode: Arc<dyn BufferProvider> = Arc::new(PooledBufferProvider::new(1024));
    let connection = Arc::new(Connection::new(ConnectionParts {
        id: IdGenerator::with_seed(config.node_id, 0).next_id(),
        kind: ConnectionKind::Client,
        reactor,
        decoding: ProcessingSettings::new(ProcessingType::Decoding, decode),
        encoding: ProcessingSettings::new(ProcessingType::Encoding, encode),
        contexts: Arc::new(ContextPool::default()),
        filter: None,
        timeout: config.timeout,
        receive_chunk: config.receive_chunk,
    }));
    (connection, memory)
}

/// Shared log of observations made by processors.
pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

pub(crate) fn journal() -> Journal { Arc::new(Mutex::new(Vec::new())) }

pub(crate) fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().expect("journal lock").clone()
}

/// Processor recording its name and returning `state`.
pub(crate) fn recording(name: &'static str, journal: &Journal, state: ProcessingState) -> Processor {
    let journal = Arc::clone(journal);
    Processor::new(name, move |_conn, _ctx| {
        journal.lock().expect("journal lock").push(name.to_owned());
        state
    })
}

/// Processor recording the current buffer as UTF-8 and stopping.
pub(crate) fn capture(journal: &Journal) -> Processor {
    let journal = Arc::clone(journal);
    Processor::new("capture", move |_conn, ctx| {
        let text = ctx
            .buffer()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        journal.lock().expect("journal lock").push(text);
        ProcessingState::Stop
    })
}

/// Processor forwarding the current buffer as UTF-8 over `tx` and stopping.
pub(crate) fn forward(tx: mpsc::UnboundedSender<String>) -> Processor {
    Processor::new("forward", move |_conn, ctx| {
        if let Some(buffer) = ctx.buffer() {
            let _ = tx.send(String::from_utf8_lossy(buffer).into_owned());
        }
        ProcessingState::Stop
    })
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
