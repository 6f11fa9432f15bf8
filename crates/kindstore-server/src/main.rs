//! kindstore emulator binary.
//!
//! Serves in-memory datasets over a Unix domain socket.

use std::path::PathBuf;

use clap::Parser;
use kindstore_core::backend::MemoryOptions;
use kindstore_server::KindstoreServer;
use tracing::info;

/// kindstore emulator: in-memory datasets behind a Unix socket.
#[derive(Parser, Debug)]
#[command(name = "kindstore-server", version)]
struct Cli {
    /// Unix socket path to listen on (default: ~/.local/share/kindstore/emulator.sock).
    #[arg(short, long, env = "KINDSTORE_EMULATOR_SOCKET")]
    socket: Option<PathBuf>,

    /// Maximum entities returned per query batch.
    #[arg(long, env = "KINDSTORE_MAX_BATCH_RESULTS", default_value_t = 300)]
    max_batch_results: usize,
}

fn default_socket_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kindstore")
        .join("emulator.sock")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let socket_path = cli.socket.unwrap_or_else(default_socket_path);

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!(
        socket = %socket_path.display(),
        max_batch_results = cli.max_batch_results,
        "starting"
    );

    let options = MemoryOptions {
        max_batch_results: cli.max_batch_results.max(1),
        ..MemoryOptions::default()
    };
    let server = KindstoreServer::with_options(socket_path, options);
    server.run().await?;

    Ok(())
}
