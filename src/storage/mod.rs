//! Storage Module
//!
//! The storage core of TokenKV: a sharded, thread-safe key-value map with
//! per-key TTL, and the background reaper that keeps expired entries from
//! accumulating.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ShardedMap                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐       ┌─────────┐     │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │  ...  │Shard 255│     │
//! │  └─────────┘ └─────────┘ └─────────┘       └─────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ bounded sweep, once per interval
//!              ┌─────────────┴─────────────┐
//!              │        TtlReaper          │
//!              │   (background task)       │
//!              └───────────────────────────┘
//! ```
//!
//! Expired entries disappear from the map in two ways: readers evict them
//! on contact (lazy expiry), and the reaper samples each shard on a timer
//! to catch the ones nobody reads anymore.

pub mod map;
pub mod reaper;

pub use map::{Entry, ShardedMap, DEFAULT_SHARD_CAPACITY, SHARD_COUNT};
pub use reaper::{ReaperConfig, TtlReaper};
