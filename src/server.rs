//! TCP Server
//!
//! Owns the listener, the accept loop, and the lifecycle of every
//! connection task. `start` binds and returns once the accept task is
//! running; `stop` broadcasts shutdown, stops accepting, and waits for all
//! outstanding connections to finish their current command and exit.
//!
//! The server also keeps the process-wide counters: total connections
//! accepted, currently active connections, total commands handled, and a
//! running flag. They are plain atomics; a snapshot may be torn across
//! counters and that is fine for observability.

use crate::commands::CommandHandler;
use crate::connection::handle_connection;
use crate::storage::ShardedMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info};

/// Errors from server startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// Process-wide server counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Connections accepted since startup.
    pub total_connections: AtomicU64,
    /// Connections currently open.
    pub active_connections: AtomicU64,
    /// Commands dispatched since startup.
    pub total_commands: AtomicU64,
    /// Whether the server is accepting connections.
    pub running: AtomicBool,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_handled(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads all counters. Not transactional across fields.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_commands: self.total_commands.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_commands: u64,
    pub running: bool,
}

struct ServerTask {
    shutdown_tx: watch::Sender<bool>,
    accept_handle: JoinHandle<()>,
}

/// A RESP server bound to one address, serving one [`ShardedMap`].
///
/// # Example
///
/// ```ignore
/// let map = Arc::new(ShardedMap::new());
/// let server = Server::new("127.0.0.1:6380", Arc::clone(&map));
/// server.start().await?;
/// // ...
/// server.stop().await;
/// ```
pub struct Server {
    addr: String,
    map: Arc<ShardedMap>,
    stats: Arc<ServerStats>,
    state: tokio::sync::Mutex<Option<ServerTask>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Creates a server for `addr`. Nothing is bound until [`Server::start`].
    pub fn new(addr: impl Into<String>, map: Arc<ShardedMap>) -> Self {
        Self {
            addr: addr.into(),
            map,
            stats: Arc::new(ServerStats::new()),
            state: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// Returns once the listener is bound and accepting. Fails if the
    /// server is already running or the bind fails.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr.clone(),
                source,
            })?;

        let local_addr = listener.local_addr().ok();
        *self.local_addr.lock().unwrap() = local_addr;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.stats.running.store(true, Ordering::Relaxed);

        let accept_handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.map),
            Arc::clone(&self.stats),
            shutdown_rx,
        ));

        *state = Some(ServerTask {
            shutdown_tx,
            accept_handle,
        });

        info!(addr = %self.addr, "server listening");
        Ok(())
    }

    /// Graceful shutdown: stop accepting, signal every connection, and wait
    /// for all of them to finish. Safe to call when not running.
    pub async fn stop(&self) {
        let task = self.state.lock().await.take();
        let Some(task) = task else {
            return;
        };

        info!("stopping server");
        self.stats.running.store(false, Ordering::Relaxed);
        let _ = task.shutdown_tx.send(true);
        let _ = task.accept_handle.await;
        info!("server stopped");
    }

    /// The address the listener actually bound, once started. Useful when
    /// binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Current counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Accepts connections until shutdown, then drains the connection tasks.
async fn accept_loop(
    listener: TcpListener,
    map: Arc<ShardedMap>,
    stats: Arc<ServerStats>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let commands = CommandHandler::new(Arc::clone(&map));
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        commands,
                        Arc::clone(&stats),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            },
            // Reap finished connection tasks as they complete.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    // Close the listener before waiting so no new connections sneak in.
    drop(listener);
    while connections.join_next().await.is_some() {}
}
