use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::core::conn::{Connection, ConnectionError, ConnectionOptions, TcpConnection};

/// Failures while establishing a fresh connection.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("No addresses configured")]
    NoAddresses,
    #[error("Connection failed: {0}")]
    Connect(String),
    /// The socket came up but the AUTH/SELECT handshake was rejected.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] ConnectionError),
}

/// Dials one fresh connection per invocation against a fixed address set.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn Connection>, DialError>;
}

/// Creates the dialer for an address set. Override point for tests and
/// custom transports; each dialer serves a single unique address set.
pub trait DialerFactory: Send + Sync {
    fn make_dialer(&self, addrs: &[String]) -> Arc<dyn Dialer>;
}

impl<F> DialerFactory for F
where
    F: Fn(&[String]) -> Arc<dyn Dialer> + Send + Sync,
{
    fn make_dialer(&self, addrs: &[String]) -> Arc<dyn Dialer> {
        (self)(addrs)
    }
}

/// Default dialer: TCP plus RESP2, choosing uniformly at random among the
/// configured addresses. Random choice is the whole replica-spreading
/// strategy; there is no health-aware routing.
pub struct TcpDialer {
    addrs: Vec<String>,
    options: ConnectionOptions,
}

impl TcpDialer {
    pub fn new(addrs: Vec<String>, options: ConnectionOptions) -> Self {
        Self { addrs, options }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<Box<dyn Connection>, DialError> {
        let addr = choose_random(&self.addrs).ok_or(DialError::NoAddresses)?;

        debug!("Dialing {}", addr);
        let conn = TcpConnection::open(addr, &self.options).await?;
        Ok(Box::new(conn))
    }
}

fn choose_random(addrs: &[String]) -> Option<&String> {
    addrs.choose(&mut rand::thread_rng())
}
