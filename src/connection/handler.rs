//! Per-Connection Handling
//!
//! Every accepted socket gets its own task running the loop in this module:
//! read bytes, parse one RESP request, dispatch it, write the reply, flush,
//! repeat. Replies always go out in request order, so pipelined clients get
//! exactly what they expect.
//!
//! A connection ends when:
//! - the peer closes cleanly (EOF with an empty buffer)
//! - the stream ends mid-request (reported as unexpected EOF)
//! - the request is unparseable (one error frame is sent, then close)
//! - a write fails
//! - nothing arrives for five minutes
//! - the server broadcasts shutdown (observed between requests, never
//!   mid-command)

use crate::commands::CommandHandler;
use crate::protocol::{ParseError, RespParser, RespValue};
use crate::server::ServerStats;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Close connections that have been silent this long.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Hard cap on buffered request bytes. Slightly above the protocol's bulk
/// string limit so one maximal value plus framing still fits.
const MAX_BUFFER_SIZE: usize = crate::protocol::parser::MAX_BULK_SIZE + 64 * 1024;

/// Initial read buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that can never parse as RESP.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The peer closed the connection between requests.
    #[error("client disconnected")]
    ClientDisconnected,

    /// The stream ended in the middle of a request.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Nothing arrived within [`IDLE_TIMEOUT`].
    #[error("idle timeout expired")]
    IdleTimeout,

    /// The peer buffered more than [`MAX_BUFFER_SIZE`] unparsed bytes.
    #[error("request buffer limit exceeded")]
    BufferFull,
}

/// State for one client connection.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    commands: CommandHandler,
    parser: RespParser,
    stats: Arc<ServerStats>,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ServerStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            commands,
            parser: RespParser::new(),
            stats,
            shutdown,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "client session ended"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "client disconnected")
            }
            Err(ConnectionError::IdleTimeout) => {
                debug!(client = %self.addr, "closing idle connection")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The read, dispatch, reply loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Drain every complete request already buffered before reading
            // again, so pipelined commands are answered in order.
            loop {
                match self.parser.parse(&self.buffer) {
                    Ok(Some((request, consumed))) => {
                        let _ = self.buffer.split_to(consumed);
                        trace!(client = %self.addr, consumed, "parsed request");

                        let reply = self.commands.dispatch(request);
                        self.stats.command_handled();
                        self.write_reply(&reply).await?;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        // Tell the client what was wrong with its framing,
                        // then give up on the stream: the parse position is
                        // unrecoverable.
                        let frame = RespValue::error(format!("ERR protocol error: {e}"));
                        let _ = self.write_reply(&frame).await;
                        return Err(ConnectionError::Parse(e));
                    }
                }
            }

            if *self.shutdown.borrow() {
                return Ok(());
            }

            // A fresh receiver clone keeps the shutdown arm from borrowing
            // `self` alongside the read.
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                result = self.read_more() => result?,
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Reads more bytes into the buffer, subject to the idle deadline.
    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            return Err(ConnectionError::BufferFull);
        }
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let read = tokio::time::timeout(
            IDLE_TIMEOUT,
            self.stream.get_mut().read_buf(&mut self.buffer),
        )
        .await;

        let n = match read {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::IdleTimeout),
        };

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        trace!(client = %self.addr, bytes = n, "read data");
        Ok(())
    }

    /// Serializes and flushes one reply.
    async fn write_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        trace!(client = %self.addr, bytes = bytes.len(), "sent reply");
        Ok(())
    }
}

/// Runs one connection and swallows the expected ways it can end.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ServerStats>,
    shutdown: watch::Receiver<bool>,
) {
    let handler = ConnectionHandler::new(stream, addr, commands, stats, shutdown);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::IdleTimeout => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => debug!(client = %addr, error = %e, "connection ended with error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ShardedMap;
    use std::sync::atomic::Ordering;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn spawn_test_server() -> (SocketAddr, Arc<ServerStats>, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let map = Arc::new(ShardedMap::new());
        let stats = Arc::new(ServerStats::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                let commands = CommandHandler::new(Arc::clone(&map));
                tokio::spawn(handle_connection(
                    stream,
                    peer,
                    commands,
                    Arc::clone(&accept_stats),
                    shutdown_rx.clone(),
                ));
            }
        });

        (addr, stats, shutdown_tx)
    }

    async fn read_some(client: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        buf[..n].to_vec()
    }

    /// Reads until `expected` bytes have arrived or the deadline passes.
    async fn read_exactly(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut out = vec![0u8; expected];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut out))
            .await
            .expect("read timed out")
            .unwrap();
        out
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ping_pong() {
        let (addr, _, _shutdown) = spawn_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_some(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_then_get() {
        let (addr, _, _shutdown) = spawn_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
            .await
            .unwrap();
        assert_eq!(read_some(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n")
            .await
            .unwrap();
        assert_eq!(read_some(&mut client).await, b"$5\r\nvalue\r\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pipelined_replies_stay_ordered() {
        let (addr, _, _shutdown) = spawn_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
                  *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            )
            .await
            .unwrap();

        let expected = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        assert_eq!(read_exactly(&mut client, expected.len()).await, expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_del_and_ttl_scenarios() {
        let (addr, _, _shutdown) = spawn_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*2\r\n$3\r\nTTL\r\n$7\r\nmissing\r\n")
            .await
            .unwrap();
        assert_eq!(read_some(&mut client).await, b":-1\r\n");

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n\
                  *3\r\n$3\r\nSET\r\n$1\r\nb\r\n$1\r\n2\r\n",
            )
            .await
            .unwrap();
        let _ = read_exactly(&mut client, b"+OK\r\n+OK\r\n".len()).await;

        client
            .write_all(b"*4\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n")
            .await
            .unwrap();
        assert_eq!(read_some(&mut client).await, b":2\r\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_command_keeps_connection_open() {
        let (addr, _, _shutdown) = spawn_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$7\r\nUNKNOWN\r\n").await.unwrap();
        let reply = read_some(&mut client).await;
        assert!(reply.starts_with(b"-ERR"), "got {reply:?}");

        // The connection is still usable afterwards.
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_some(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_protocol_error_sends_frame_then_closes() {
        let (addr, _, _shutdown) = spawn_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"@not-resp\r\n").await.unwrap();
        let reply = read_some(&mut client).await;
        assert!(reply.starts_with(b"-ERR protocol error"), "got {reply:?}");

        // The server closed the stream after the error frame.
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stats_track_connections_and_commands() {
        let (addr, stats, _shutdown) = spawn_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let _ = read_some(&mut client).await;

        assert_eq!(stats.total_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert!(stats.total_commands.load(Ordering::Relaxed) >= 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_signal_closes_idle_connection() {
        let (addr, _, shutdown_tx) = spawn_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Make sure the connection task is up before signaling.
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let _ = read_some(&mut client).await;

        shutdown_tx.send(true).unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(n, 0, "connection should close on shutdown");
    }
}
