use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ClientConfig;
use crate::core::backoff::RetryBackoff;
use crate::core::breaker::{BreakerGate, NoopGate};
use crate::core::command::Command;
use crate::core::conn::{Connection, ConnectionError, ConnectionOptions};
use crate::core::dialer::{Dialer, DialerFactory, TcpDialer};
use crate::core::pipeline::Pipeline;
use crate::core::pool::{Pool, PoolError, SlotPool};
use crate::core::resp::RespValue;

/// Errors surfaced to callers of the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No connection could be borrowed from the pool, either because the
    /// borrow timed out or because a dial attempt failed.
    #[error("No connection available in pool")]
    NoConnection,
    /// The client has been closed and refuses further use.
    #[error("Pool is closed")]
    Closed,
    /// The borrowed connection failed while running the command.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl ClientError {
    /// True for failures that poison the connection they occurred on but
    /// may well succeed when re-run on a fresh one.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Connection(err) if err.is_transport())
    }
}

/// Task-safe, minimal, pooled Redis client.
///
/// Any number of tasks may share one client; each operation borrows a
/// connection, runs, and returns the connection to the pool. Transport
/// failures are retried on a fresh connection after a backoff interval, so
/// callers only ever observe a reply, [`ClientError::NoConnection`], or a
/// server-origin error.
pub struct Client {
    pool: Arc<dyn Pool>,
    borrow_timeout: Option<Duration>,
    retry_backoff: RetryBackoff,
    read_replica: Option<Box<Client>>,
}

impl Client {
    /// Client with default configuration against a single address.
    pub fn connect(addr: impl Into<String>) -> Client {
        Self::builder(addr).build()
    }

    pub fn builder(addr: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(addr.into())
    }

    /// Run one command on the remote server and return its raw reply.
    pub async fn exec(&self, command: Command) -> Result<RespValue, ClientError> {
        self.with_retry(|| self.run_command(&command).boxed()).await
    }

    /// A builder to which commands can be attached. The whole batch is sent
    /// in a single request bracketed by MULTI/EXEC. A pipeline does NOT
    /// guarantee atomicity; bundle commands in a Lua script and run it with
    /// EVAL when you need that.
    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self)
    }

    /// The client addressing the configured read replicas, or this client
    /// when none are configured. Replica clients are closed by their parent
    /// and never need an independent `close`.
    pub fn read_replica(&self) -> &Client {
        self.read_replica.as_deref().unwrap_or(self)
    }

    /// Close all open connections to the remote servers, replica pool
    /// included. Blocks until borrowed connections have been released.
    pub async fn close(&self) {
        // Replica clients never nest, so one level is the whole tree.
        if let Some(replica) = &self.read_replica {
            replica.pool.close().await;
        }
        self.pool.close().await;
    }

    pub(crate) async fn run_batch_with_retry(
        &self,
        commands: &[Command],
    ) -> Result<RespValue, ClientError> {
        self.with_retry(|| self.run_batch(commands).boxed()).await
    }

    // Retry wrapper: transport errors provoke another attempt after a
    // backoff interval, everything else ends the series. The prototype is
    // cloned so concurrent series keep independent interval sequences.
    async fn with_retry<'a, T>(
        &self,
        mut attempt: impl FnMut() -> BoxFuture<'a, Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let mut backoff = self.retry_backoff.clone();
        loop {
            match attempt().await {
                Err(err) if err.is_transport() => {
                    debug!("Connection from pool was stale, retrying");
                    tokio::time::sleep(backoff.next_interval()).await;
                }
                result => return result,
            }
        }
    }

    async fn run_command(&self, command: &Command) -> Result<RespValue, ClientError> {
        let mut conn = self.borrow_connection().await?;
        let result = conn.exec(command).await;
        self.release(conn, result.is_err()).await;
        Ok(result?)
    }

    async fn run_batch(&self, commands: &[Command]) -> Result<RespValue, ClientError> {
        let mut conn = self.borrow_connection().await?;

        if let Err(err) = conn.send(&Command::new("MULTI")).await {
            self.release(conn, true).await;
            return Err(err.into());
        }

        // Once MULTI is in flight the queued commands are bound to this
        // connection; the first failure abandons the whole batch.
        for command in commands {
            if let Err(err) = conn.send(command).await {
                self.release(conn, true).await;
                return Err(err.into());
            }
        }

        let result = conn.exec(&Command::new("EXEC")).await;
        self.release(conn, result.is_err()).await;
        Ok(result?)
    }

    async fn borrow_connection(&self) -> Result<Box<dyn Connection>, ClientError> {
        let start = Instant::now();
        let borrowed = match self.borrow_timeout {
            Some(timeout) => self.pool.borrow_within(timeout).await,
            None => self.pool.borrow().await,
        };

        match borrowed {
            Ok(conn) => {
                debug!(
                    "Received connection after {}ms",
                    start.elapsed().as_millis()
                );
                Ok(conn)
            }
            Err(PoolError::Closed) => Err(ClientError::Closed),
            Err(PoolError::NoConnection) => {
                debug!(
                    "Could not borrow connection after {}ms",
                    start.elapsed().as_millis()
                );
                Err(ClientError::NoConnection)
            }
        }
    }

    // A connection that saw any error is closed and replaced by a vacant
    // marker; only clean connections go back into the pool. Bad connections
    // must never go back live or the usable capacity would silently shrink.
    async fn release(&self, mut conn: Box<dyn Connection>, failed: bool) {
        if failed {
            if let Err(err) = conn.close().await {
                debug!("Could not close connection ({})", err);
            }
            self.pool.release(None).await;
        } else {
            self.pool.release(Some(conn)).await;
        }
    }
}

/// Option-style construction for [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    retry_backoff: RetryBackoff,
    gate: Arc<dyn BreakerGate>,
    dialer_factory: Option<Arc<dyn DialerFactory>>,
}

impl ClientBuilder {
    fn new(addr: String) -> Self {
        Self {
            config: ClientConfig {
                addr,
                ..ClientConfig::default()
            },
            retry_backoff: RetryBackoff::default(),
            gate: Arc::new(NoopGate),
            dialer_factory: None,
        }
    }

    /// Start from a full configuration record, for example one loaded from
    /// YAML.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            retry_backoff: RetryBackoff::default(),
            gate: Arc::new(NoopGate),
            dialer_factory: None,
        }
    }

    /// Authentication secret (default is none).
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    /// Database index selected on every fresh connection (default is 0).
    pub fn database(mut self, database: i64) -> Self {
        self.config.database = database;
        self
    }

    /// Deadline for establishing a TCP connection (default is 5 seconds).
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// Per-operation read deadline (default is 5 seconds).
    pub fn read_timeout_secs(mut self, secs: u64) -> Self {
        self.config.read_timeout_secs = secs;
        self
    }

    /// Per-operation write deadline (default is 5 seconds).
    pub fn write_timeout_secs(mut self, secs: u64) -> Self {
        self.config.write_timeout_secs = secs;
        self
    }

    /// Maximum number of concurrent connections (default is 10).
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    /// Deadline for a single borrow. Without one, a borrow blocks until a
    /// slot frees up.
    pub fn borrow_timeout_ms(mut self, millis: u64) -> Self {
        self.config.borrow_timeout_ms = Some(millis);
        self
    }

    /// Addresses of the read replicas served by `Client::read_replica`.
    pub fn read_replica_addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.read_replica_addrs = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Backoff prototype for retries after a transport error (default is
    /// linear from 1ms in 250ms steps, capped at 5 seconds).
    pub fn retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Circuit breaker gate around dial attempts (default is a no-op gate).
    pub fn breaker_gate(mut self, gate: Arc<dyn BreakerGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Override how dialers are created per address set; primarily for
    /// tests and custom transports.
    pub fn dialer_factory(mut self, factory: impl DialerFactory + 'static) -> Self {
        self.dialer_factory = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> Client {
        let options = self.config.connection_options();

        let read_replica = if self.config.read_replica_addrs.is_empty() {
            None
        } else {
            Some(Box::new(self.assemble(
                self.config.read_replica_addrs.clone(),
                &options,
                None,
            )))
        };

        self.assemble(vec![self.config.addr.clone()], &options, read_replica)
    }

    fn assemble(
        &self,
        addrs: Vec<String>,
        options: &ConnectionOptions,
        read_replica: Option<Box<Client>>,
    ) -> Client {
        let dialer: Arc<dyn Dialer> = match &self.dialer_factory {
            Some(factory) => factory.make_dialer(&addrs),
            None => Arc::new(TcpDialer::new(addrs, options.clone())),
        };

        let pool = SlotPool::new(dialer, self.config.pool_capacity, self.gate.clone());

        Client {
            pool: Arc::new(pool),
            borrow_timeout: self.config.borrow_timeout(),
            retry_backoff: self.retry_backoff.clone(),
            read_replica,
        }
    }
}
