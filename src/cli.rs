//! Command line interface for the `brokerframe` demo broker.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `brokerframe` binary.
#[derive(Debug, Parser)]
#[command(name = "brokerframe", version, about = "Echo broker built on brokerframe")]
pub struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    pub listen: SocketAddr,
    /// Node number stamped on connection ids.
    #[arg(long, default_value_t = 0)]
    pub node: u32,
    /// Treat peers as mesh nodes, which never expire.
    #[arg(long)]
    pub mesh: bool,
    /// Idle timeout in seconds.
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
    /// Number of accept workers. Defaults to the CPU count.
    #[arg(short, long)]
    pub workers: Option<usize>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_defaults() {
        let cli = Cli::parse_from(["brokerframe"]);
        assert_eq!(cli.listen.port(), 7000);
        assert!(!cli.mesh);
        assert_eq!(cli.timeout_secs, 60);
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "brokerframe",
            "--listen",
            "0.0.0.0:9000",
            "--node",
            "3",
            "--mesh",
            "-w",
            "2",
        ]);
        assert_eq!(cli.listen.port(), 9000);
        assert_eq!(cli.node, 3);
        assert!(cli.mesh);
        assert_eq!(cli.workers, Some(2));
    }
}
