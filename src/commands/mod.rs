//! Command Processing
//!
//! The dispatch layer between the RESP codec and the storage core. One
//! parsed request goes in, one reply comes out:
//!
//! ```text
//! RespValue (request) ──> CommandHandler ──> ShardedMap
//!                                │
//! RespValue (reply)   <──────────┘
//! ```
//!
//! Supported commands: `PING`, `ECHO`, `GET`, `SET` (with `EX`), `DEL`,
//! `EXISTS`, `TTL`, `EXPIRE`, `DBSIZE`, `FLUSHALL`, `KEYS` (`*` only) and
//! `INFO`.

pub mod handler;

pub use handler::CommandHandler;
