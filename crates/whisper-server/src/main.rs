use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;
use whisper_engine::EventEngine;
use whisper_server::{ChatServer, ServerConfig};

/// whisper LAN chat server
#[derive(Parser, Debug)]
#[command(name = "whisperd")]
#[command(about = "LAN chat server", long_about = None)]
struct Args {
    /// TCP bind address
    #[arg(short, long, default_value = "127.0.0.1:50005")]
    bind: SocketAddr,

    /// Seconds a new connection has to complete its handshake
    #[arg(long, default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServerConfig {
        bind: args.bind,
        handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
        ..ServerConfig::default()
    };

    let engine = EventEngine::new()?;
    let mut server = ChatServer::new(config);
    let local = server.start(&engine)?;
    info!(%local, "whisperd starting");

    server.run(&engine)?;
    info!("whisperd exited");
    Ok(())
}
