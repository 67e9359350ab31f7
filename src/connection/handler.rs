//! Per-connection session handling.
//!
//! Each accepted socket gets one task running a [`Session`]:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ loop:                                         │
//! │   drain buffer: decode ─▶ dispatch ─▶ reply   │
//! │   (repeat while complete commands remain)     │
//! │   read more bytes from the socket             │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! TCP is a stream, so a read may carry a partial command or several
//! commands at once; the accumulation buffer absorbs both. A protocol
//! error is answered with an error reply and the buffered input is
//! dropped, since the tail of a malformed frame has no usable boundary.
//! The connection then keeps serving. Only three things end a session:
//! the peer closing (or going quiet past the idle timeout), `QUIT`, and
//! input too large to ever decode.

use crate::commands::Dispatcher;
use crate::protocol::{decode_command, ProtocolError, Reply};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Hard cap on buffered, not-yet-decoded input per connection.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Initial accumulation buffer capacity.
const INITIAL_BUFFER_SIZE: usize = 4096;

/// A connection with no bytes for this long is closed.
const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Counters shared by every session.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted since startup.
    pub connections_accepted: AtomicU64,
    /// Connections currently being served.
    pub active_connections: AtomicU64,
    /// Total commands dispatched.
    pub commands_processed: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why a session ended, beyond a client-requested QUIT.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed between commands. Not reported to anyone.
    #[error("client disconnected")]
    Disconnected,

    /// The peer closed mid-frame, leaving undecodable bytes behind.
    #[error("unexpected end of stream inside a command")]
    UnexpectedEof,

    /// No bytes arrived within the idle window.
    #[error("idle read timeout")]
    IdleTimeout,

    /// Buffered input hit the cap without containing one whole command.
    #[error("input buffer capacity exceeded")]
    BufferFull,
}

/// State for one client connection: the socket, the accumulation
/// buffer, and a dispatcher handle over the shared store.
pub struct Session {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    dispatcher: Dispatcher,
    stats: Arc<ConnectionStats>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        dispatcher: Dispatcher,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            dispatcher,
            stats,
        }
    }

    /// Serves the connection until it ends, logging the outcome.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "session closed"),
            Err(ConnectionError::Disconnected) => {
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

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Answer every complete command already buffered before
            // touching the socket again, so pipelined requests get
            // their replies in order.
            loop {
                if self.buffer.is_empty() {
                    break;
                }

                match decode_command(&self.buffer) {
                    Ok(Some((argv, consumed))) => {
                        let _ = self.buffer.split_to(consumed);
                        trace!(
                            client = %self.addr,
                            consumed,
                            remaining = self.buffer.len(),
                            "decoded command"
                        );

                        let outcome = self.dispatcher.dispatch(&argv);
                        self.stats.command_processed();
                        self.write_reply(&outcome.reply).await?;

                        if outcome.close {
                            debug!(client = %self.addr, "client sent QUIT");
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(client = %self.addr, error = %e, "protocol error");
                        let reply = Reply::error(format!("ERR parse error: {}", e));
                        self.write_reply(&reply).await?;

                        // An oversized frame can never be decoded; the
                        // peer would keep streaming into a dead buffer.
                        if matches!(e, ProtocolError::BulkTooLarge { .. }) {
                            debug!(client = %self.addr, "closing after oversized frame");
                            return Ok(());
                        }

                        self.buffer.clear();
                    }
                }
            }

            self.read_more().await?;
        }
    }

    /// Pulls more bytes from the socket into the accumulation buffer.
    async fn read_more(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                buffered = self.buffer.len(),
                "input buffer cap exceeded"
            );
            let reply = Reply::error("ERR parse error: request exceeds input buffer capacity");
            self.write_reply(&reply).await?;
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = match timeout(
            IDLE_READ_TIMEOUT,
            self.stream.get_mut().read_buf(&mut self.buffer),
        )
        .await
        {
            Ok(read) => read?,
            Err(_) => return Err(ConnectionError::IdleTimeout),
        };

        if n == 0 {
            // EOF between commands is a clean close; EOF with a partial
            // frame buffered is not.
            if self.buffer.is_empty() {
                return Err(ConnectionError::Disconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        trace!(client = %self.addr, bytes = n, "read");
        Ok(())
    }

    async fn write_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.encode();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        trace!(client = %self.addr, bytes = bytes.len(), reply = %reply, "sent reply");
        Ok(())
    }
}

/// Runs a [`Session`] to completion, swallowing the endings that are
/// routine from the server's point of view.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    stats: Arc<ConnectionStats>,
) {
    let session = Session::new(stream, addr, dispatcher, stats);
    if let Err(e) = session.run().await {
        match e {
            ConnectionError::Disconnected | ConnectionError::IdleTimeout => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<Store>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Store::new());
        let stats = Arc::new(ConnectionStats::new());

        let store_clone = Arc::clone(&store);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let dispatcher = Dispatcher::new(Arc::clone(&store_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, dispatcher, stats));
            }
        });

        (addr, store, stats)
    }

    async fn read_reply(client: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    async fn accept_session(listener: &TcpListener) -> Session {
        let (stream, peer) = listener.accept().await.unwrap();
        Session::new(
            stream,
            peer,
            Dispatcher::new(Arc::new(Store::new())),
            Arc::new(ConnectionStats::new()),
        )
    }

    #[tokio::test]
    async fn test_inline_ping() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"PING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_array_ping() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_set_get_over_wire() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$3\r\nbar\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nbaz\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_unknown_command_reply() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*1\r\n$6\r\nwibble\r\n")
            .await
            .unwrap();
        let reply = read_reply(&mut client).await;
        assert!(reply.starts_with(b"-ERR unknown command"));
    }

    #[tokio::test]
    async fn test_empty_array_reply() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*0\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"-ERR no command given\r\n");
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_session_alive() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$x\r\nfoo\r\n").await.unwrap();
        let reply = read_reply(&mut client).await;
        assert!(reply.starts_with(b"-ERR parse error"));

        // The malformed tail was discarded; the session still serves.
        client.write_all(b"PING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_empty_line_is_protocol_error() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"\r\n").await.unwrap();
        assert_eq!(
            read_reply(&mut client).await,
            b"-ERR parse error: empty command\r\n"
        );

        client.write_all(b"PING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$9999999\r\n").await.unwrap();
        let reply = read_reply(&mut client).await;
        assert!(reply.starts_with(b"-ERR parse error: bulk length"));

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_buffer_cap_closes_connection() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // A line with no terminator can never decode; it accumulates
        // until the buffer cap trips.
        let junk = vec![b'A'; MAX_BUFFER_SIZE];
        client.write_all(&junk).await.unwrap();

        let reply = read_reply(&mut client).await;
        assert!(reply.starts_with(b"-ERR parse error: request exceeds input buffer capacity"));

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_not_clean() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"*2\r\n$3\r\nGET\r\n$3").await.unwrap();
            // Dropping the stream here abandons the frame unfinished.
        });

        let session = accept_session(&listener).await;
        assert!(matches!(
            session.run().await,
            Err(ConnectionError::UnexpectedEof)
        ));

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_between_commands_is_clean() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(b"PING\r\n").await.unwrap();
            let mut buf = [0u8; 16];
            let n = client.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"+PONG\r\n");
        });

        let session = accept_session(&listener).await;
        assert!(matches!(
            session.run().await,
            Err(ConnectionError::Disconnected)
        ));

        client.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_times_out() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Nothing is ever sent. The paused clock runs down the idle
        // window and the server closes its end.
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let (addr, _, _) = create_test_server().await;
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

        let expected: &[u8] = b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n";
        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("replies arrived in time")
            .unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_split_frame_across_writes() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*2\r\n$3\r\nGET\r\n$3").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.write_all(b"\r\nfoo\r\n").await.unwrap();

        assert_eq!(read_reply(&mut client).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn test_binary_value_over_wire() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nbin\r\n$7\r\na\r\nb\x00c\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"+OK\r\n");

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nbin\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut client).await, b"$7\r\na\r\nb\x00c\r\n");
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"PING\r\n").await.unwrap();
        let _ = read_reply(&mut client).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
