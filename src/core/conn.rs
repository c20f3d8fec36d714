use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::core::command::Command;
use crate::core::dialer::DialError;
use crate::core::resp::{encode_command, read_value, RespValue};

/// Failures reported by a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The underlying socket observed an unrecoverable I/O condition. The
    /// connection must not be reused.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
    /// The server rejected the command.
    #[error("Server error: {0}")]
    Server(String),
    /// The reply could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// True for failures that poison the connection they occurred on but
    /// may well succeed when re-run on a fresh one.
    pub fn is_transport(&self) -> bool {
        matches!(self, ConnectionError::Transport(_))
    }
}

/// A single, feature-minimal connection to a Redis server.
///
/// Once a connection reports a transport error it must not be reused; the
/// pool replaces it with a vacant slot.
#[async_trait]
pub trait Connection: Send {
    /// Run a command and return its raw reply.
    async fn exec(&mut self, command: &Command) -> Result<RespValue, ConnectionError>;

    /// Queue a command as part of a MULTI/EXEC sequence without awaiting
    /// its reply.
    async fn send(&mut self, command: &Command) -> Result<(), ConnectionError>;

    /// Close the connection to the remote server.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Connection")
    }
}

/// Per-connection parameters applied by the TCP dialer.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub password: String,
    pub database: i64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            password: String::new(),
            database: 0,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// RESP2 connection over a buffered TCP stream.
///
/// `send` only writes into the stream buffer; `exec` flushes everything
/// queued so far and reads one reply per outstanding command, returning the
/// last. This keeps a MULTI/EXEC batch on a single request/response
/// exchange.
pub struct TcpConnection {
    stream: BufStream<TcpStream>,
    read_timeout: Duration,
    write_timeout: Duration,
    // Replies owed for commands queued since the last exec.
    pending: usize,
    broken: bool,
    write_buf: Vec<u8>,
}

impl TcpConnection {
    /// Connect, tune the socket, and run the AUTH/SELECT handshake.
    pub async fn open(addr: &str, options: &ConnectionOptions) -> Result<Self, DialError> {
        let stream = timeout(options.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DialError::Connect(format!("connect to {} timed out", addr)))?
            .map_err(|err| DialError::Connect(format!("connect to {} failed: {}", addr, err)))?;

        // Disable Nagle to keep request latency low for small payloads.
        let _ = stream.set_nodelay(true);
        tune_socket(&stream);

        let mut conn = TcpConnection {
            stream: BufStream::new(stream),
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
            pending: 0,
            broken: false,
            write_buf: Vec::with_capacity(256),
        };

        if !options.password.is_empty() {
            conn.exec(&Command::new("AUTH").arg(options.password.clone()))
                .await?;
        }
        if options.database != 0 {
            conn.exec(&Command::new("SELECT").arg(options.database.to_string()))
                .await?;
        }

        Ok(conn)
    }

    fn guard(&self) -> Result<(), ConnectionError> {
        if self.broken {
            return Err(ConnectionError::Transport(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection previously failed",
            )));
        }
        Ok(())
    }

    async fn queue(&mut self, command: &Command) -> Result<(), ConnectionError> {
        self.write_buf.clear();
        encode_command(command, &mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;
        self.pending += 1;
        Ok(())
    }

    async fn roundtrip(&mut self, command: &Command) -> Result<RespValue, ConnectionError> {
        self.queue(command).await?;
        let owed = self.pending;
        self.pending = 0;

        timeout(self.write_timeout, self.stream.flush())
            .await
            .map_err(|_| deadline_error("write"))??;

        let mut last = RespValue::Null;
        for _ in 0..owed {
            last = timeout(self.read_timeout, read_value(&mut self.stream))
                .await
                .map_err(|_| deadline_error("read"))??;
        }

        match last {
            RespValue::Error(message) => Err(ConnectionError::Server(message)),
            value => Ok(value),
        }
    }

    fn fail<T>(&mut self, err: ConnectionError) -> Result<T, ConnectionError> {
        if err.is_transport() {
            self.broken = true;
        }
        Err(err)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn exec(&mut self, command: &Command) -> Result<RespValue, ConnectionError> {
        self.guard()?;
        match self.roundtrip(command).await {
            Ok(value) => Ok(value),
            Err(err) => self.fail(err),
        }
    }

    async fn send(&mut self, command: &Command) -> Result<(), ConnectionError> {
        self.guard()?;
        match self.queue(command).await {
            Ok(()) => Ok(()),
            Err(err) => self.fail(err),
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.broken = true;
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

fn deadline_error(op: &str) -> ConnectionError {
    ConnectionError::Transport(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{} deadline elapsed", op),
    ))
}

/// Optimize the TCP socket for cache-style request/response traffic.
fn tune_socket(stream: &TcpStream) {
    let socket_ref = socket2::SockRef::from(stream);
    // 32KB buffers balance latency vs throughput for small commands.
    let _ = socket_ref.set_send_buffer_size(32768);
    let _ = socket_ref.set_recv_buffer_size(32768);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_poison_connections() {
        let transport = ConnectionError::Transport(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(transport.is_transport());

        assert!(!ConnectionError::Server("WRONGTYPE".to_string()).is_transport());
        assert!(!ConnectionError::Protocol("bad frame".to_string()).is_transport());
    }
}
