//! Lifecycle tests driven through a [`MemoryReactor`].

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;
use tokio::{
    sync::mpsc,
    time::{Duration, advance, timeout},
};
use tokio_util::sync::CancellationToken;

use super::{CloseReason, Connection, ConnectionKind, ConnectionState, InputEvent};
use crate::{
    buffer::PooledBufferProvider,
    config::ConnectionConfig,
    error::ConnectionError,
    filter::{ConnectionFilter, FilteredStream, RawStream},
    hooks::Client,
    processing::{ProcessingState, Processor},
    reactor::{MemoryReactor, Reactor, ReactorCallbacks, ReadStatus},
    test_support::{
        Journal,
        connect,
        connection,
        entries,
        factory,
        forward,
        journal,
        pooled_connection,
        wait_until,
    },
};

/// Client recording its callbacks.
struct RecordingClient {
    events: Journal,
}

impl RecordingClient {
    fn new() -> Arc<Self> { Arc::new(Self { events: journal() }) }

    fn events(&self) -> Vec<String> { entries(&self.events) }

    fn record(&self, event: &str) { self.events.lock().expect("events lock").push(event.to_owned()); }
}

impl Client for RecordingClient {
    fn on_bind(&self, _connection: &Arc<Connection>) { self.record("bind"); }

    fn on_open(&self, _connection: &Arc<Connection>) { self.record("open"); }

    fn on_disconnect(&self, _connection: &Connection) { self.record("disconnect"); }
}

fn recorded(
    kind: ConnectionKind,
    config: ConnectionConfig,
) -> (Arc<Connection>, Arc<MemoryReactor>, Arc<RecordingClient>) {
    let client = RecordingClient::new();
    let (conn, reactor) = connect(&factory(config), kind, client.clone());
    (conn, reactor, client)
}

fn forwarding(conn: &Connection) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    conn.decoding().add_last(forward(tx));
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("segment not processed in time")
        .expect("processor dropped")
}

#[tokio::test]
async fn start_opens_and_notifies_client() {
    let (conn, reactor, client) = recorded(ConnectionKind::Client, ConnectionConfig::default());
    assert_eq!(client.events(), ["bind"]);
    assert_eq!(conn.state(), ConnectionState::Creating);

    conn.start().expect("start");

    assert_eq!(conn.state(), ConnectionState::Open);
    assert!(reactor.is_reading());
    assert_eq!(client.events(), ["bind", "open"]);
    let err = conn.start().expect_err("second start");
    assert!(matches!(
        err,
        ConnectionError::InvalidState {
            operation: "start",
            state: ConnectionState::Open
        }
    ));

    conn.stop().await;
}

#[tokio::test]
async fn received_bytes_reach_the_decode_pipeline() {
    let (conn, reactor) = connect(
        &factory(ConnectionConfig::default().receive_chunk(4)),
        ConnectionKind::Client,
        Arc::new(()),
    );
    let mut rx = forwarding(&conn);
    conn.start().expect("start");

    assert!(reactor.deliver(b"ping"));
    assert_eq!(next(&mut rx).await, "ping");

    assert!(reactor.deliver(b"abcdefgh"));
    assert_eq!(next(&mut rx).await, "abcd");
    assert_eq!(next(&mut rx).await, "efgh");

    conn.stop().await;
}

#[rstest]
#[case::eof(ReadStatus::Eof)]
#[case::reset(ReadStatus::Reset)]
#[tokio::test]
async fn end_of_stream_closes_and_disposes(#[case] status: ReadStatus) {
    let (conn, reactor, client) = recorded(ConnectionKind::Client, ConnectionConfig::default());
    conn.start().expect("start");

    assert!(reactor.deliver_status(status));
    wait_until(|| conn.is_disposed()).await;

    assert_eq!(conn.state(), ConnectionState::SocketClosed);
    assert!(reactor.is_shut_down());
    assert!(reactor.is_closed());
    assert_eq!(client.events(), ["bind", "open", "disconnect"]);
}

#[tokio::test]
async fn read_error_aborts_the_connection() {
    let (conn, reactor) = connection();
    conn.start().expect("start");
    let token = conn.cancellation_token();

    assert!(reactor.deliver_status(ReadStatus::Error(io::Error::other("boom"))));

    assert!(token.is_cancelled());
    assert!(reactor.is_closed());
    assert_eq!(conn.state(), ConnectionState::SocketClosed);
    assert!(conn.is_disposed());
}

#[tokio::test]
async fn reassembly_returns_every_buffer_to_the_pool() {
    let provider = Arc::new(PooledBufferProvider::new(8192));
    let (conn, reactor) = pooled_connection(&provider);
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.decoding()
        .add_last(Processor::new("six-byte-frames", move |_conn, ctx| {
            match ctx.buffer() {
                Some(buffer) if buffer.len() < 6 => ProcessingState::InsufficientData,
                Some(buffer) => {
                    let _ = tx.send(String::from_utf8_lossy(buffer).into_owned());
                    ProcessingState::Stop
                }
                None => ProcessingState::Stop,
            }
        }));
    conn.start().expect("start");

    assert!(reactor.deliver(b"ABC"));
    assert!(reactor.deliver(b"DEF"));

    assert_eq!(next(&mut rx).await, "ABCDEF");
    wait_until(|| provider.outstanding() == 0).await;
    assert_eq!(provider.retained(), 2);
    conn.stop().await;
}

#[tokio::test]
async fn failed_read_start_tears_down() {
    let (conn, reactor) = connection();
    reactor.close();

    let err = conn.start().expect_err("closed reactor cannot read");

    assert!(matches!(err, ConnectionError::Io(_)));
    assert_eq!(conn.state(), ConnectionState::SocketClosed);
    assert!(conn.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn idle_client_expires() {
    let config = ConnectionConfig::default().timeout(Duration::from_secs(10));
    let (conn, _reactor, _client) = recorded(ConnectionKind::Client, config);
    assert!(!conn.check_alive());

    conn.start().expect("start");
    assert!(conn.check_alive());

    advance(Duration::from_secs(6)).await;
    conn.touch();
    advance(Duration::from_secs(6)).await;
    assert!(conn.check_alive());

    advance(Duration::from_secs(5)).await;
    assert!(!conn.check_alive());

    conn.set_timeout(Duration::from_secs(30));
    assert!(conn.check_alive());
    assert_eq!(conn.timeout(), Duration::from_secs(30));

    conn.stop().await;
    assert!(!conn.check_alive());
}

#[tokio::test(start_paused = true)]
async fn mesh_connections_never_expire() {
    let config = ConnectionConfig::default().timeout(Duration::from_secs(1));
    let (conn, _reactor, _client) = recorded(ConnectionKind::Mesh, config);
    conn.start().expect("start");

    advance(Duration::from_secs(3_600)).await;

    assert!(conn.check_alive());
    conn.stop().await;
}

#[test]
fn keep_alive_close_only_applies_when_open() {
    let (conn, reactor) = connection();

    conn.close(CloseReason::ConnectionKeepAlive);

    assert_eq!(conn.state(), ConnectionState::Creating);
    assert!(!reactor.is_shut_down());
}

#[tokio::test]
async fn closing_blocks_writes_until_the_socket_closes() {
    let reactor = MemoryReactor::with_manual_close();
    let conn = factory(ConnectionConfig::default())
        .create(reactor.clone(), ConnectionKind::Client, Arc::new(()))
        .expect("create connection");
    conn.start().expect("start");
    conn.write(Bytes::from_static(b"before")).expect("write while open");

    conn.close(CloseReason::SocketShutdown);

    assert_eq!(conn.state(), ConnectionState::Disconnecting);
    assert!(reactor.is_shut_down());
    assert!(!conn.check_alive());
    assert!(matches!(
        conn.write(Bytes::from_static(b"after")),
        Err(ConnectionError::Closed)
    ));
    assert!(matches!(conn.send(1_u8), Err(ConnectionError::Closed)));

    reactor.close();

    assert_eq!(conn.state(), ConnectionState::SocketClosed);
    assert!(conn.is_disposed());
    assert_eq!(&reactor.written()[..], b"before");
}

#[test]
fn stopping_a_connection_closed_before_start_disposes_it() {
    let reactor = MemoryReactor::with_manual_close();
    let conn = factory(ConnectionConfig::default())
        .create(reactor.clone(), ConnectionKind::Client, Arc::new(()))
        .expect("create connection");
    conn.close(CloseReason::SocketShutdown);
    assert_eq!(conn.state(), ConnectionState::Disconnecting);

    conn.request_stop();

    assert_eq!(conn.state(), ConnectionState::SocketClosed);
    assert!(conn.is_disposed());
    assert!(reactor.is_closed());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "dropped without disposal")]
fn started_connection_dropped_without_disposal_panics() {
    let (conn, _reactor) = connection();
    let callbacks: Arc<dyn ReactorCallbacks> = Arc::new(super::Callbacks(Arc::downgrade(&conn)));
    assert!(conn.callbacks.set(callbacks).is_ok());

    drop(conn);
}

#[test]
fn disposal_runs_once_and_late_hooks_fire_immediately() {
    let client = RecordingClient::new();
    let (conn, _reactor) = connect(
        &factory(ConnectionConfig::default()),
        ConnectionKind::Client,
        client.clone(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let early = Arc::clone(&calls);
    conn.on_disconnect(move |_| {
        early.fetch_add(1, Ordering::SeqCst);
    });

    conn.request_stop();
    conn.request_stop();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.events(), ["bind", "disconnect"]);
    assert_eq!(conn.state(), ConnectionState::SocketClosed);

    let late = Arc::clone(&calls);
    conn.on_disconnect(move |_| {
        late.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn second_client_cannot_bind() {
    let (conn, _reactor) = connection();
    let err = conn.bind_client(Arc::new(())).expect_err("already bound");
    assert!(matches!(err, ConnectionError::ClientAlreadyBound));
}

#[tokio::test]
async fn abort_before_start_prevents_opening() {
    let (conn, reactor, client) = recorded(ConnectionKind::Client, ConnectionConfig::default());

    conn.abort();

    assert_eq!(conn.state(), ConnectionState::ToDisconnect);
    assert!(!conn.cancellation_token().is_cancelled());
    let err = conn.start().expect_err("aborted connection cannot start");
    assert!(matches!(
        err,
        ConnectionError::InvalidState {
            state: ConnectionState::ToDisconnect,
            ..
        }
    ));
    assert!(!reactor.is_reading());
    assert_eq!(client.events(), ["bind"]);

    conn.request_stop();
    assert!(conn.is_disposed());
    assert!(reactor.is_closed());
}

#[tokio::test]
async fn token_requested_after_abort_is_already_cancelled() {
    let (conn, reactor) = connection();
    conn.start().expect("start");

    conn.abort();

    assert!(reactor.is_closed());
    assert!(conn.cancellation_token().is_cancelled());
    assert_eq!(conn.state(), ConnectionState::SocketClosed);
}

#[tokio::test]
async fn stop_waits_for_the_socket_to_close() {
    let (conn, reactor, client) = recorded(ConnectionKind::Client, ConnectionConfig::default());
    conn.start().expect("start");

    timeout(Duration::from_secs(5), conn.stop())
        .await
        .expect("stop completes");

    assert_eq!(conn.state(), ConnectionState::SocketClosed);
    assert!(reactor.is_shut_down());
    assert!(conn.is_disposed());
    assert_eq!(client.events(), ["bind", "open", "disconnect"]);
}

/// Filter expecting `HELLO` and answering `OK` before handing over the
/// raw streams.
struct Greeting;

#[async_trait]
impl ConnectionFilter for Greeting {
    async fn on_connection(&self, raw: RawStream) -> io::Result<FilteredStream> {
        match raw.input.read().await {
            InputEvent::Data(segment) if &segment[..] == b"HELLO" => {}
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected greeting: {other:?}"),
                ));
            }
        }
        raw.output.write(Bytes::from_static(b"OK")).await?;
        Ok(FilteredStream::passthrough(raw))
    }
}

#[tokio::test]
async fn filter_handshake_runs_before_opening() {
    let client = RecordingClient::new();
    let factory = factory(ConnectionConfig::default()).with_filter(Arc::new(Greeting));
    let (conn, reactor) = connect(&factory, ConnectionKind::Client, client.clone());
    let mut rx = forwarding(&conn);

    conn.start().expect("start");
    assert_eq!(conn.state(), ConnectionState::Creating);

    assert!(reactor.deliver(b"HELLO"));
    wait_until(|| conn.state() == ConnectionState::Open).await;
    assert_eq!(&reactor.written()[..], b"OK");
    assert_eq!(client.events(), ["bind", "open"]);

    assert!(reactor.deliver(b"after handshake"));
    assert_eq!(next(&mut rx).await, "after handshake");

    conn.stop().await;
}

/// Filter that either rejects the handshake or panics during it.
struct Broken {
    panics: bool,
}

#[async_trait]
impl ConnectionFilter for Broken {
    async fn on_connection(&self, _raw: RawStream) -> io::Result<FilteredStream> {
        assert!(!self.panics, "filter exploded");
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "handshake refused"))
    }
}

#[rstest]
#[case::rejects(false)]
#[case::panics(true)]
#[tokio::test]
async fn broken_filter_closes_the_connection(#[case] panics: bool) {
    let client = RecordingClient::new();
    let factory = factory(ConnectionConfig::default()).with_filter(Arc::new(Broken { panics }));
    let (conn, reactor) = connect(&factory, ConnectionKind::Client, client.clone());

    conn.start().expect("start");
    wait_until(|| conn.is_disposed()).await;

    assert_eq!(conn.state(), ConnectionState::SocketClosed);
    assert!(reactor.is_closed());
    assert_eq!(client.events(), ["bind", "disconnect"]);
}

#[tokio::test]
async fn write_async_waits_for_acknowledgement() {
    let (conn, reactor) = connection();
    conn.start().expect("start");
    reactor.hold_acks(true);
    let never = CancellationToken::new();

    let (res, ()) = tokio::join!(
        conn.write_async(Bytes::from_static(b"abc"), &never),
        async {
            tokio::task::yield_now().await;
            reactor.release_acks();
        }
    );

    res.expect("acknowledged write");
    assert_eq!(&reactor.written()[..], b"abc");
    reactor.hold_acks(false);
    conn.flush_async().await.expect("flush");
    conn.stop().await;
}

#[tokio::test]
async fn write_async_honours_cancellation() {
    let (conn, reactor) = connection();
    conn.start().expect("start");
    reactor.hold_acks(true);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = conn
        .write_async(Bytes::from_static(b"late"), &cancel)
        .await
        .expect_err("cancelled");

    assert!(matches!(err, ConnectionError::Cancelled));
    conn.stop().await;
}

#[tokio::test]
async fn pause_and_resume_toggle_reading() {
    let (conn, reactor) = connection();
    let err = conn.resume().expect_err("never started");
    assert!(matches!(err, ConnectionError::InvalidState { .. }));
    let mut rx = forwarding(&conn);
    conn.start().expect("start");

    conn.pause();
    assert!(!reactor.is_reading());
    assert!(!reactor.deliver(b"dropped"));

    conn.resume().expect("resume");
    assert!(reactor.is_reading());
    assert!(reactor.deliver(b"kept"));
    assert_eq!(next(&mut rx).await, "kept");

    conn.stop().await;
}

#[tokio::test]
async fn addresses_come_from_the_reactor() {
    let (conn, _reactor) = connection();
    assert_eq!(conn.remote_address(), "127.0.0.1:40000".parse().ok());
    assert_eq!(conn.local_address(), "127.0.0.1:7000".parse().ok());
}

/// One externally driven lifecycle event.
#[derive(Clone, Copy, Debug)]
enum Step {
    Start,
    Close(CloseReason),
    Abort,
    RequestStop,
    SocketClosed,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Start),
        Just(Step::Close(CloseReason::ConnectionKeepAlive)),
        Just(Step::Close(CloseReason::SocketShutdown)),
        Just(Step::Close(CloseReason::SocketDisconnect)),
        Just(Step::Abort),
        Just(Step::RequestStop),
        Just(Step::SocketClosed),
    ]
}

/// Apply `steps` to a fresh connection, recording the state after each.
fn state_trace(steps: &[Step]) -> Vec<ConnectionState> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime");
    runtime.block_on(async {
        let reactor = MemoryReactor::with_manual_close();
        let conn = factory(ConnectionConfig::default())
            .create(reactor.clone(), ConnectionKind::Client, Arc::new(()))
            .expect("create connection");
        let mut trace = vec![conn.state()];
        for step in steps {
            match *step {
                Step::Start => {
                    let _ = conn.start();
                }
                Step::Close(reason) => conn.close(reason),
                Step::Abort => conn.abort(),
                Step::RequestStop => conn.request_stop(),
                Step::SocketClosed => reactor.close(),
            }
            tokio::task::yield_now().await;
            trace.push(conn.state());
        }
        conn.request_stop();
        reactor.close();
        trace.push(conn.state());
        assert!(conn.is_disposed());
        trace
    })
}

proptest! {
    #[test]
    fn state_never_moves_backwards(steps in prop::collection::vec(step(), 1..12)) {
        let trace = state_trace(&steps);

        for pair in trace.windows(2) {
            prop_assert!(
                pair[0] == pair[1] || pair[0].can_advance_to(pair[1]),
                "{:?} -> {:?} in {:?}",
                pair[0],
                pair[1],
                trace
            );
        }
        prop_assert!(
            !(trace.contains(&ConnectionState::Open)
                && trace.contains(&ConnectionState::ToDisconnect)),
            "opened and aborted-before-open in {:?}",
            trace
        );
        prop_assert_eq!(trace.last(), Some(&ConnectionState::SocketClosed));
    }
}
