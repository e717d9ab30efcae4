//! TokenKV server binary.
//!
//! Wires the pieces together: parse flags, set up logging, build the map,
//! start the reaper and the TCP server, then wait for Ctrl+C and shut
//! everything down in order.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokenkv::server::Server;
use tokenkv::storage::{ReaperConfig, ShardedMap, TtlReaper, SHARD_COUNT};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// How often the running counters are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "tokenkv",
    version,
    about = "In-memory session/token cache speaking the Redis wire protocol"
)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:6380 or 0.0.0.0:6380.
    #[arg(long, default_value = tokenkv::DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// Initial capacity of each of the 256 shards.
    #[arg(long, default_value_t = tokenkv::storage::DEFAULT_SHARD_CAPACITY)]
    initial_capacity: usize,

    /// Milliseconds between TTL reaper passes.
    #[arg(long, default_value_t = 1000)]
    cleanup_interval_ms: u64,

    /// Expired-key eviction budget per reaper pass, across all shards.
    #[arg(long, default_value_t = 100)]
    keys_per_scan: usize,
}

fn print_banner(listen: &str) {
    println!(
        r#"
  _____     _              _  ____     __
 |_   _|__ | | _____ _ __ | |/ /\ \   / /
   | |/ _ \| |/ / _ \ '_ \| ' /  \ \ / /
   | | (_) |   <  __/ | | | . \   \ V /
   |_|\___/|_|\_\___|_| |_|_|\_\   \_/

TokenKV v{} - in-memory session/token cache
Listening on {}. Connect with any Redis client:
    redis-cli -h 127.0.0.1 -p {}

Ctrl+C shuts down gracefully.
"#,
        tokenkv::VERSION,
        listen,
        listen.rsplit(':').next().unwrap_or("6380"),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    print_banner(&args.listen);
    info!(
        listen = %args.listen,
        shards = SHARD_COUNT,
        initial_capacity = args.initial_capacity,
        cleanup_interval_ms = args.cleanup_interval_ms,
        keys_per_scan = args.keys_per_scan,
        "starting TokenKV"
    );

    let map = Arc::new(ShardedMap::with_capacity(args.initial_capacity));

    let reaper = TtlReaper::new(
        Arc::clone(&map),
        ReaperConfig {
            cleanup_interval: Duration::from_millis(args.cleanup_interval_ms),
            keys_per_scan: args.keys_per_scan,
        },
    );
    reaper.start();

    let server = Arc::new(Server::new(args.listen.clone(), Arc::clone(&map)));
    server.start().await?;
    info!(listen = %args.listen, "ready to accept connections");

    let stats_task = tokio::spawn(log_stats(Arc::clone(&server)));

    signal::ctrl_c().await?;
    info!("shutdown signal received, stopping");

    server.stop().await;
    reaper.stop().await;
    stats_task.abort();

    info!("shutdown complete");
    Ok(())
}

/// Logs the server counters every [`STATS_INTERVAL`] while running.
async fn log_stats(server: Arc<Server>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await;

    loop {
        interval.tick().await;
        let stats = server.stats();
        if !stats.running {
            return;
        }
        info!(
            total_connections = stats.total_connections,
            active_connections = stats.active_connections,
            total_commands = stats.total_commands,
            "server stats"
        );
    }
}
