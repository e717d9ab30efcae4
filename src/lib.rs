//! # TokenKV - In-Memory Session and Token Cache
//!
//! TokenKV is a Redis-compatible, in-memory key-value store built for
//! single-sign-on style session workloads: many small keys, high
//! concurrency, and a time-to-live on almost everything. Any off-the-shelf
//! Redis client can talk to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            TokenKV                               │
//! │                                                                  │
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────────┐              │
//! │  │   Server   │──>│ Connection  │──>│  Command    │              │
//! │  │ (accept)   │   │  Handler    │   │  Handler    │              │
//! │  └────────────┘   └──────┬──────┘   └──────┬──────┘              │
//! │                          │                 │                     │
//! │                   ┌──────┴──────┐          ▼                     │
//! │                   │ RESP codec  │   ┌──────────────────────────┐ │
//! │                   └─────────────┘   │        ShardedMap        │ │
//! │                                     │ 256 × (RwLock + HashMap) │ │
//! │                                     └────────────▲─────────────┘ │
//! │                                                  │               │
//! │                                     ┌────────────┴─────────────┐ │
//! │                                     │        TtlReaper         │ │
//! │                                     │     (background task)    │ │
//! │                                     └──────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP value types, serializer, and incremental parser
//! - [`storage`]: the sharded map and the TTL reaper
//! - [`commands`]: the request dispatcher
//! - [`connection`]: per-client connection tasks
//! - [`server`]: listener lifecycle, graceful shutdown, stats
//!
//! ## Expiry Model
//!
//! Keys with a TTL disappear two ways: a reader that touches an expired
//! entry evicts it on the spot, and the background reaper samples every
//! shard once per interval with a bounded eviction budget. Hot keys go
//! promptly, cold keys go eventually, and neither path scans the whole
//! dataset.
//!
//! ## Quick Start
//!
//! ```ignore
//! use tokenkv::server::Server;
//! use tokenkv::storage::{ReaperConfig, ShardedMap, TtlReaper};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let map = Arc::new(ShardedMap::new());
//!
//!     let reaper = TtlReaper::new(Arc::clone(&map), ReaperConfig::default());
//!     reaper.start();
//!
//!     let server = Server::new("127.0.0.1:6380", Arc::clone(&map));
//!     server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     reaper.stop().await;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionError, ConnectionHandler};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::{Server, ServerError, ServerStats, StatsSnapshot};
pub use storage::{ReaperConfig, ShardedMap, TtlReaper};

/// Default listen address. Deliberately not 6379, so a stray redis-server
/// and TokenKV can coexist on one host.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6380";

/// Crate version, reported by `INFO` and `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
