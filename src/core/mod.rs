pub mod backoff;
pub mod breaker;
pub mod client;
pub mod command;
pub mod conn;
pub mod dialer;
pub mod pipeline;
pub mod pool;
pub mod resp;

pub use backoff::{BackoffStrategy, RetryBackoff};
pub use breaker::{BreakerError, BreakerGate, NoopGate};
pub use client::{Client, ClientBuilder, ClientError};
pub use command::Command;
pub use conn::{Connection, ConnectionError, ConnectionOptions, TcpConnection};
pub use dialer::{DialError, Dialer, DialerFactory, TcpDialer};
pub use pipeline::Pipeline;
pub use pool::{Pool, PoolError, PoolStatus, SlotPool};
pub use resp::RespValue;
