use async_trait::async_trait;

use crate::core::conn::Connection;
use crate::core::dialer::{DialError, Dialer};

/// Failures surfaced by a breaker gate.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The gate refused the attempt while the remote is considered
    /// unhealthy.
    #[error("Dial circuit is open")]
    Open,
    #[error(transparent)]
    Dial(#[from] DialError),
}

/// Guards dial attempts so a failing remote is not hammered.
///
/// Implementations observe the outcome of each attempt and may short-circuit
/// with [`BreakerError::Open`] without invoking the dialer at all.
#[async_trait]
pub trait BreakerGate: Send + Sync {
    /// Run one dial attempt through the gate.
    async fn dial(&self, dialer: &dyn Dialer) -> Result<Box<dyn Connection>, BreakerError>;
}

/// Pass-through gate used when no circuit breaker is configured.
pub struct NoopGate;

#[async_trait]
impl BreakerGate for NoopGate {
    async fn dial(&self, dialer: &dyn Dialer) -> Result<Box<dyn Connection>, BreakerError> {
        Ok(dialer.dial().await?)
    }
}
