//! Echo broker demonstrating `brokerframe` usage.
//!
//! Every byte received is written straight back to the sender.

mod cli;

use std::{sync::Arc, time::Duration};

use brokerframe::{
    BrokerServer,
    Client,
    Connection,
    ConnectionConfig,
    ConnectionKind,
    ProcessingState,
    Processor,
};
use bytes::Bytes;
use clap::Parser;

/// Client installing a single processor that echoes each segment.
struct EchoClient;

impl Client for EchoClient {
    fn on_bind(&self, connection: &Arc<Connection>) {
        connection
            .decoding()
            .add_last(Processor::new("echo", |conn, ctx| {
                if let Some(segment) = ctx.take_buffer() {
                    let sent = conn.write(Bytes::copy_from_slice(&segment));
                    ctx.settings().provider().release_segment(segment);
                    if sent.is_err() {
                        return ProcessingState::Failure;
                    }
                }
                ProcessingState::Stop
            }));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let config = ConnectionConfig::default()
        .node_id(cli.node)
        .timeout(Duration::from_secs(cli.timeout_secs));
    let kind = if cli.mesh {
        ConnectionKind::Mesh
    } else {
        ConnectionKind::Client
    };
    let mut server = BrokerServer::new(config, || -> Arc<dyn Client> { Arc::new(EchoClient) })
        .kind(kind);
    if let Some(workers) = cli.workers {
        server = server.workers(workers);
    }
    server.bind(cli.listen)?.run().await?;
    Ok(())
}
