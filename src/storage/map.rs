//! Sharded Key-Value Map with Per-Key TTL
//!
//! This module implements the storage core of TokenKV: a fixed array of 256
//! independently locked shards, each holding a plain `HashMap` from key to
//! entry. Keys are routed to shards with FNV-1a (32-bit), so the same key
//! bytes always land on the same shard, on every run and every host.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: 256 shards instead of one big lock keeps writer
//!    contention low under many concurrent connections.
//! 2. **Lazy Expiry**: expired entries are evicted when a reader encounters
//!    them; the background reaper handles the cold ones.
//! 3. **Seconds-Granularity TTL**: expiration instants are whole seconds
//!    since the Unix epoch, with `0` meaning "never expires".
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ShardedMap                            │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐       ┌─────────┐     │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │  ...  │Shard 255│     │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │       │ RwLock  │     │
//! │  │ HashMap │ │ HashMap │ │ HashMap │       │ HashMap │     │
//! │  └─────────┘ └─────────┘ └─────────┘       └─────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! No operation ever holds more than one shard lock at a time.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of shards. Must be a power of two so routing can mask instead of
/// divide. 256 keeps lock contention low without noticeable memory overhead.
pub const SHARD_COUNT: usize = 256;

/// Default initial capacity of each shard's `HashMap`.
pub const DEFAULT_SHARD_CAPACITY: usize = 4096;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 16_777_619;

/// FNV-1a, 32-bit. Chosen for stable, byte-exact shard placement rather than
/// speed or distribution quality.
#[inline]
pub(crate) fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps key bytes to a shard index.
#[inline]
pub(crate) fn shard_index(key: &[u8]) -> usize {
    fnv1a_32(key) as usize & (SHARD_COUNT - 1)
}

/// Current wall-clock time in whole seconds since the Unix epoch.
#[inline]
pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A stored value with its expiration metadata.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The stored value. Opaque bytes; the map never inspects them.
    pub value: Bytes,
    /// Absolute expiration instant in Unix seconds. `0` means never expires.
    pub expires_at: u64,
    /// Unix second at which this entry was last set.
    pub created_at: u64,
}

impl Entry {
    /// True once wall time has reached the expiration instant.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at > 0 && now >= self.expires_at
    }
}

/// A single shard: one lock, one map.
#[derive(Debug)]
struct Shard {
    entries: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }
}

/// A thread-safe key-value map split across [`SHARD_COUNT`] shards.
///
/// This is the single piece of shared mutable state in the server. It is
/// designed to be wrapped in an `Arc` and shared between every connection
/// task and the TTL reaper.
///
/// # Example
///
/// ```
/// use tokenkv::storage::ShardedMap;
/// use bytes::Bytes;
///
/// let map = ShardedMap::new();
///
/// // Store a session token for an hour.
/// map.set(Bytes::from("session:abc"), Bytes::from("user-42"), 3600);
/// assert_eq!(map.get(b"session:abc"), Some(Bytes::from("user-42")));
///
/// // A TTL of 0 means the entry never expires.
/// map.set(Bytes::from("config"), Bytes::from("v1"), 0);
/// assert_eq!(map.ttl(b"config"), -2);
/// ```
#[derive(Debug)]
pub struct ShardedMap {
    shards: Vec<Shard>,
}

impl Default for ShardedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedMap {
    /// Creates a map with the default per-shard capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SHARD_CAPACITY)
    }

    /// Creates a map whose shards pre-allocate `capacity` slots each.
    ///
    /// A capacity of 0 falls back to [`DEFAULT_SHARD_CAPACITY`].
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_SHARD_CAPACITY
        } else {
            capacity
        };
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard::with_capacity(capacity))
            .collect();
        Self { shards }
    }

    #[inline]
    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[shard_index(key)]
    }

    /// Stores or replaces an entry.
    ///
    /// A `ttl_secs` of 0 stores the entry without expiration; any positive
    /// value expires it `ttl_secs` whole seconds from now.
    pub fn set(&self, key: Bytes, value: Bytes, ttl_secs: u64) {
        let now = now_unix();
        let expires_at = if ttl_secs > 0 { now + ttl_secs } else { 0 };

        let shard = self.shard_for(&key);
        let mut entries = shard.entries.write().unwrap();
        entries.insert(
            key,
            Entry {
                value,
                expires_at,
                created_at: now,
            },
        );
    }

    /// Returns the value for `key`, or `None` if it is absent or expired.
    ///
    /// An expired entry found here is removed as a side effect (lazy
    /// expiry). The fast path takes only the shard's read lock; the writer
    /// lock is acquired only when an eviction is needed.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let shard = self.shard_for(key);
        let now = now_unix();

        {
            let entries = shard.entries.read().unwrap();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Expired under the read lock. Re-check under the writer: a
        // concurrent SET may have replaced the entry in between.
        let mut entries = shard.entries.write().unwrap();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes `key`.
    ///
    /// # Returns
    ///
    /// `true` if an entry was physically removed, `false` otherwise. A
    /// logically expired but still-present entry counts as removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        let shard = self.shard_for(key);
        let mut entries = shard.entries.write().unwrap();
        entries.remove(key).is_some()
    }

    /// True if `key` is present and not expired. Evicts lazily, like
    /// [`ShardedMap::get`].
    pub fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Total number of physically stored entries.
    ///
    /// Sums per-shard counts one shard at a time, so the result is not an
    /// atomic snapshot and may include expired-but-unswept entries.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.entries.read().unwrap().len())
            .sum()
    }

    /// True if no shard holds any entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry in every shard. Shard capacity is retained.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.entries.write().unwrap().clear();
        }
    }

    /// Remaining time to live for `key`, in whole seconds.
    ///
    /// # Returns
    ///
    /// - `-1` if the key does not exist
    /// - `-2` if the key exists without an expiration
    /// - `0` if the key exists but its expiration has already passed
    /// - the remaining seconds otherwise
    ///
    /// Unlike [`ShardedMap::get`], this never evicts: it holds only the
    /// shard's read lock.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        let shard = self.shard_for(key);
        let entries = shard.entries.read().unwrap();

        let entry = match entries.get(key) {
            Some(entry) => entry,
            None => return -1,
        };

        if entry.expires_at == 0 {
            return -2;
        }

        let now = now_unix();
        if now >= entry.expires_at {
            return 0;
        }

        (entry.expires_at - now) as i64
    }

    /// Updates the expiration of an existing key.
    ///
    /// A `ttl_secs` of 0 removes the expiration. Entries whose expiration
    /// has already passed are treated as absent: they are evicted and the
    /// update is refused. Never creates a key.
    ///
    /// # Returns
    ///
    /// `true` if the expiration was updated.
    pub fn expire(&self, key: &[u8], ttl_secs: u64) -> bool {
        let shard = self.shard_for(key);
        let now = now_unix();

        let mut entries = shard.entries.write().unwrap();
        match entries.get_mut(key) {
            None => false,
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                false
            }
            Some(entry) => {
                entry.expires_at = if ttl_secs > 0 { now + ttl_secs } else { 0 };
                true
            }
        }
    }

    /// Collects every non-expired key across all shards.
    ///
    /// O(n) over the whole dataset; intended for the KEYS command only.
    pub fn keys(&self) -> Vec<Bytes> {
        let now = now_unix();
        let mut out = Vec::new();
        for shard in &self.shards {
            let entries = shard.entries.read().unwrap();
            out.extend(
                entries
                    .iter()
                    .filter(|(_, entry)| !entry.is_expired(now))
                    .map(|(key, _)| key.clone()),
            );
        }
        out
    }

    /// Approximate bytes held by live entries: key and value lengths plus
    /// a fixed 64-byte per-entry overhead estimate. Scans every shard under
    /// its read lock; intended for the INFO command only.
    pub fn approx_bytes(&self) -> usize {
        let now = now_unix();
        let mut total = 0usize;
        for shard in &self.shards {
            let entries = shard.entries.read().unwrap();
            for (key, entry) in entries.iter() {
                if !entry.is_expired(now) {
                    total += key.len() + entry.value.len() + 64;
                }
            }
        }
        total
    }

    /// Number of shards. Always [`SHARD_COUNT`].
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Evicts up to `budget` expired entries from one shard, inspecting at
    /// most `2 * budget` entries so a shard full of live keys stays cheap to
    /// visit. Called by the TTL reaper once per shard per pass.
    ///
    /// # Returns
    ///
    /// The number of entries evicted.
    pub(crate) fn sweep_shard(&self, index: usize, budget: usize, now: u64) -> usize {
        let shard = &self.shards[index];
        let mut entries = shard.entries.write().unwrap();

        let mut expired: Vec<Bytes> = Vec::with_capacity(budget);
        let mut inspected = 0usize;

        for (key, entry) in entries.iter() {
            inspected += 1;
            if entry.is_expired(now) {
                expired.push(key.clone());
                if expired.len() >= budget {
                    break;
                }
            }
            if inspected >= budget * 2 {
                break;
            }
        }

        for key in &expired {
            entries.remove(key);
        }

        expired.len()
    }
}
