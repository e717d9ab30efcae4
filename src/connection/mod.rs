//! Connection Module
//!
//! Per-client connection handling. The server's accept loop spawns one task
//! per socket; each task owns a [`ConnectionHandler`] that buffers incoming
//! bytes, parses RESP requests, and writes replies in request order.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
