//! ArchiFlow collaboration server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory diagrams, local only (development)
//! archiflow-server
//!
//! # Persistent diagrams, reachable from the network
//! archiflow-server --bind 0.0.0.0:3333 --storage ./archiflow-db
//!
//! # Same, configured from the environment
//! ARCHIFLOW_BIND=0.0.0.0:3333 ARCHIFLOW_STORAGE=./archiflow-db archiflow-server
//! ```

use std::path::PathBuf;

use archiflow_collab::server::{CollabServer, ServerConfig};
use clap::Parser;

/// ArchiFlow real-time collaboration server
#[derive(Parser, Debug)]
#[command(name = "archiflow-server")]
#[command(about = "Relays presence and diagram edits between ArchiFlow editors")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, env = "ARCHIFLOW_BIND", default_value = "127.0.0.1:3333")]
    bind: String,

    /// RocksDB directory for saved diagrams (in-memory when omitted)
    #[arg(short, long, env = "ARCHIFLOW_STORAGE")]
    storage: Option<PathBuf>,

    /// Frames buffered per connection before it is treated as lagging
    #[arg(long, env = "ARCHIFLOW_OUTBOUND_BUFFER", default_value = "256")]
    outbound_buffer: usize,

    /// Largest accepted inbound message, in bytes
    #[arg(long, env = "ARCHIFLOW_MAX_MESSAGE_BYTES", default_value = "4194304")]
    max_message_bytes: usize,

    /// Commands queued for the hub task
    #[arg(long, env = "ARCHIFLOW_HUB_QUEUE", default_value = "1024")]
    hub_queue: usize,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "ARCHIFLOW_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: args.bind,
            outbound_buffer: args.outbound_buffer,
            max_message_bytes: args.max_message_bytes,
            hub_queue: args.hub_queue,
            storage_path: args.storage,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    log::info!("ArchiFlow collaboration server starting");
    if args.storage.is_none() {
        log::warn!("No storage path given - saved diagrams are lost on restart");
    }

    let server = CollabServer::bind(ServerConfig::from(args)).await?;
    log::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    log::info!("Server stopped");
    Ok(())
}
