//! Async TCP connection to a cluster node.
//!
//! Wraps a `tokio::net::TcpStream` with an integrated read buffer and
//! RESP parser for efficient, streaming request/response I/O. This is the
//! fixed `connect`/`send`/`read_reply` surface the dispatch engine treats as
//! an opaque codec — it carries no `AUTH`/`HELLO`/`SELECT` handshake and no
//! TLS, since authentication and encryption are out of scope.

use crate::error::{ClusterError, Result};
use crate::resp::parser::{parse, resp_frame_len};
use crate::resp::types::RespValue;
use crate::resp::writer::{encode_command, encode_command_str};

use bytes::{Bytes, BytesMut};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default initial read buffer capacity (64 KB).
const DEFAULT_BUF_CAPACITY: usize = 64 * 1024;

/// Default maximum read buffer size (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// A single async connection to a cluster node.
pub struct NodeConnection {
    stream: TcpStream,
    /// Read buffer (data read from socket but not yet consumed by parser).
    buf: BytesMut,
    /// Maximum allowed buffer size.
    max_buf_size: usize,
    /// Timestamp of last successful I/O.
    pub last_used: Instant,
}

impl NodeConnection {
    /// Connect to `addr` (e.g. "127.0.0.1:6379").
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_max_buf(addr, DEFAULT_MAX_BUF_SIZE).await
    }

    /// Connect with a configurable max buffer size.
    pub async fn connect_with_max_buf(addr: &str, max_buf_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            max_buf_size,
            last_used: Instant::now(),
        })
    }

    /// Connect with a timeout.
    pub async fn connect_timeout(addr: &str, timeout: std::time::Duration) -> Result<Self> {
        Self::connect_timeout_with_max_buf(addr, timeout, DEFAULT_MAX_BUF_SIZE).await
    }

    /// Connect with a timeout and configurable max buffer size.
    pub async fn connect_timeout_with_max_buf(
        addr: &str,
        timeout: std::time::Duration,
        max_buf_size: usize,
    ) -> Result<Self> {
        match tokio::time::timeout(timeout, Self::connect_with_max_buf(addr, max_buf_size)).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout(format!(
                "connection to {addr} timed out after {timeout:?}"
            ))),
        }
    }

    /// Send raw bytes to the node.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.last_used = Instant::now();
        Ok(())
    }

    /// Read and parse one complete RESP value from the node.
    ///
    /// Freezes the read buffer to `Bytes` before parsing, enabling
    /// zero-copy `slice()` for bulk strings.
    pub async fn read_response(&mut self) -> Result<RespValue> {
        loop {
            if !self.buf.is_empty() {
                let snapshot = self.buf.split().freeze();
                match parse(&snapshot) {
                    Ok((value, consumed)) => {
                        if consumed < snapshot.len() {
                            self.buf.extend_from_slice(&snapshot[consumed..]);
                        }
                        self.last_used = Instant::now();
                        return Ok(value);
                    }
                    Err(ClusterError::Incomplete) => {
                        self.buf.extend_from_slice(&snapshot);
                    }
                    Err(e) => {
                        self.buf.extend_from_slice(&snapshot);
                        return Err(e);
                    }
                }
            }

            self.grow_if_needed()?;
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ClusterError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by node",
                )));
            }
        }
    }

    /// Read one complete RESP frame as raw `Bytes`, without parsing.
    ///
    /// Only performs the lightweight `resp_frame_len` check (no allocations,
    /// no `RespValue` tree) — used by the pipeline queue, which defers
    /// parsing until reassembly needs it.
    pub async fn read_raw_response(&mut self) -> Result<Bytes> {
        loop {
            if !self.buf.is_empty() {
                match resp_frame_len(&self.buf) {
                    Ok(len) => {
                        let raw = self.buf.split_to(len).freeze();
                        self.last_used = Instant::now();
                        return Ok(raw);
                    }
                    Err(ClusterError::Incomplete) => {}
                    Err(e) => return Err(e),
                }
            }

            self.grow_if_needed()?;
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ClusterError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by node",
                )));
            }
        }
    }

    fn grow_if_needed(&mut self) -> Result<()> {
        if self.buf.capacity() - self.buf.len() >= 4096 {
            return Ok(());
        }
        let new_cap = (self.buf.capacity() * 2).max(DEFAULT_BUF_CAPACITY);
        if new_cap > self.max_buf_size {
            if self.buf.capacity() >= self.max_buf_size {
                return Err(ClusterError::OutOfMemory);
            }
            self.buf.reserve(self.max_buf_size - self.buf.capacity());
        } else {
            self.buf.reserve(new_cap - self.buf.capacity());
        }
        Ok(())
    }

    /// Send a command and read the response.
    pub async fn execute(&mut self, args: &[&[u8]]) -> Result<RespValue> {
        let cmd = encode_command(args);
        self.send_raw(&cmd).await?;
        self.read_response().await
    }

    /// Send a command (string args) and read the response.
    pub async fn execute_str(&mut self, args: &[&str]) -> Result<RespValue> {
        let cmd = encode_command_str(args);
        self.send_raw(&cmd).await?;
        self.read_response().await
    }

    /// Send `PING` and report whether the node answered `PONG`.
    pub async fn ping(&mut self) -> Result<bool> {
        let response = self.execute_str(&["PING"]).await?;
        match response {
            RespValue::SimpleString(ref s) if s == "PONG" => Ok(true),
            _ => Ok(false),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn mock_server(response_bytes: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(&response_bytes).await.unwrap();
            socket.shutdown().await.ok();
        });

        addr
    }

    async fn mock_server_multi(responses: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for response in responses {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(&response).await.unwrap();
            }
            socket.shutdown().await.ok();
        });

        addr
    }

    #[tokio::test]
    async fn connect_and_ping() {
        let addr = mock_server(b"+PONG\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.ping().await.unwrap();
        assert!(result);
    }

    #[tokio::test]
    async fn connect_and_execute_str() {
        let addr = mock_server(b"+OK\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.execute_str(&["SET", "key", "value"]).await.unwrap();
        assert_eq!(result, RespValue::SimpleString("OK".into()));
    }

    #[tokio::test]
    async fn execute_returns_integer() {
        let addr = mock_server(b":42\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.execute_str(&["INCR", "counter"]).await.unwrap();
        assert_eq!(result, RespValue::Integer(42));
    }

    #[tokio::test]
    async fn execute_returns_bulk_string() {
        let addr = mock_server(b"$5\r\nhello\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.execute_str(&["GET", "key"]).await.unwrap();
        assert_eq!(result, RespValue::BulkString(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn execute_returns_null() {
        let addr = mock_server(b"$-1\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.execute_str(&["GET", "missing"]).await.unwrap();
        assert_eq!(result, RespValue::Null);
    }

    #[tokio::test]
    async fn execute_returns_array() {
        let addr = mock_server(b"*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn
            .execute_str(&["LRANGE", "mylist", "0", "-1"])
            .await
            .unwrap();
        assert_eq!(
            result,
            RespValue::Array(vec![
                RespValue::BulkString(Bytes::from_static(b"foo")),
                RespValue::BulkString(Bytes::from_static(b"bar")),
            ])
        );
    }

    #[tokio::test]
    async fn moved_error_surfaces_as_resp_error() {
        let addr = mock_server(b"-MOVED 3999 127.0.0.1:7001\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.execute_str(&["GET", "key"]).await.unwrap();
        assert!(result.is_error());
        assert_eq!(
            result.as_error_msg(),
            Some("MOVED 3999 127.0.0.1:7001")
        );
    }

    #[tokio::test]
    async fn multi_command_sequence() {
        let responses = vec![b"+OK\r\n".to_vec(), b"$5\r\nhello\r\n".to_vec()];
        let addr = mock_server_multi(responses).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();

        let r1 = conn.execute_str(&["SET", "k", "hello"]).await.unwrap();
        assert_eq!(r1, RespValue::SimpleString("OK".into()));

        let r2 = conn.execute_str(&["GET", "k"]).await.unwrap();
        assert_eq!(r2, RespValue::BulkString(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn connection_closed_by_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.execute_str(&["PING"]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_to_invalid_address() {
        let result = NodeConnection::connect("127.0.0.1:1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_with_timeout() {
        let result = NodeConnection::connect_timeout(
            "192.0.2.1:6379",
            std::time::Duration::from_millis(100),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn large_response() {
        let data = vec![b'x'; 16_000];
        let mut response = format!("${}\r\n", data.len()).into_bytes();
        response.extend_from_slice(&data);
        response.extend_from_slice(b"\r\n");

        let addr = mock_server(response).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let result = conn.execute_str(&["GET", "bigkey"]).await.unwrap();
        if let RespValue::BulkString(b) = result {
            assert_eq!(b.len(), 16_000);
            assert!(b.iter().all(|&x| x == b'x'));
        } else {
            panic!("expected BulkString");
        }
    }

    #[tokio::test]
    async fn last_used_updates() {
        let addr = mock_server(b"+PONG\r\n".to_vec()).await;
        let mut conn = NodeConnection::connect(&addr).await.unwrap();
        let before = conn.last_used;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        conn.ping().await.unwrap();
        assert!(conn.last_used > before);
    }
}
