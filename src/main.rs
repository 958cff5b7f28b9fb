//! chat-relay: a line-oriented TCP chat relay
//!
//! Every client sends its display name as the first line, then
//! `<name>: <message>` lines. The server relays chat to everyone else and
//! answers a few slash commands:
//! - `/help`: list the commands
//! - `/echo <message>`: repeat a message back to the sender
//! - `/who`: list everyone online
//! - `/leave`: disconnect
//!
//! The same binary also ships a small interactive client (`join`).
//! Configuration comes from CLI arguments or a TOML file.

mod client;
mod command;
mod config;
mod message;
mod registry;
mod server;
mod session;

use config::{Config, Mode};
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = build_runtime(config.workers)?;

    match config.mode.clone() {
        Mode::Serve => runtime.block_on(run_server(config)),
        Mode::Join { host, port, name } => runtime.block_on(run_client(host, port, name)),
    }
}

fn build_runtime(workers: Option<usize>) -> std::io::Result<tokio::runtime::Runtime> {
    let workers = workers.filter(|&n| n > 0).unwrap_or_else(num_cpus);
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("chat-relay-worker")
        .enable_all()
        .build()
}

async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen,
        workers = ?config.workers,
        write_timeout_ms = config.write_timeout.as_millis() as u64,
        "Starting chat-relay server"
    );

    Server::new(config).run().await?;
    Ok(())
}

async fn run_client(
    host: String,
    port: u16,
    name: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let exit = client::run(&host, port, name).await?;
    if exit == client::Exit::ServerClosed {
        eprintln!("Connection closed by server.");
    }
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
