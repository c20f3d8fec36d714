#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sleipnir::{
    BreakerError, BreakerGate, Command, Connection, ConnectionError, DialError, Dialer, RespValue,
};

/// A transport-class error as the connection layer would report it.
pub fn transport_eof() -> ConnectionError {
    ConnectionError::Transport(io::Error::from(io::ErrorKind::UnexpectedEof))
}

/// Observable state of one scripted connection, shared with the test body.
#[derive(Default)]
pub struct ConnState {
    ops: Mutex<Vec<String>>,
    exec_results: Mutex<VecDeque<Result<RespValue, ConnectionError>>>,
    send_results: Mutex<VecDeque<Result<(), ConnectionError>>>,
    fallback_exec: Mutex<Option<RespValue>>,
    close_count: AtomicUsize,
}

impl ConnState {
    /// Queue the reply for the next unscripted `exec` call.
    pub fn push_exec(&self, result: Result<RespValue, ConnectionError>) {
        self.exec_results.lock().unwrap().push_back(result);
    }

    /// Queue the outcome for the next `send` call.
    pub fn push_send(&self, result: Result<(), ConnectionError>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    /// Reply returned by `exec` once the scripted queue is exhausted.
    pub fn set_fallback_exec(&self, value: RespValue) {
        *self.fallback_exec.lock().unwrap() = Some(value);
    }

    /// Every exec/send observed, in order, as "name arg1 arg2 ..." strings.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

/// Scripted in-memory connection recording every operation.
pub struct MockConn {
    state: Arc<ConnState>,
}

impl MockConn {
    pub fn new() -> (Box<dyn Connection>, Arc<ConnState>) {
        let state = Arc::new(ConnState::default());
        (
            Box::new(MockConn {
                state: state.clone(),
            }),
            state,
        )
    }

    /// A connection whose every `exec` replies with `value`.
    pub fn replying(value: RespValue) -> (Box<dyn Connection>, Arc<ConnState>) {
        let (conn, state) = Self::new();
        state.set_fallback_exec(value);
        (conn, state)
    }
}

#[async_trait]
impl Connection for MockConn {
    async fn exec(&mut self, command: &Command) -> Result<RespValue, ConnectionError> {
        self.state.ops.lock().unwrap().push(command.to_string());
        match self.state.exec_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self
                .state
                .fallback_exec
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(RespValue::Null)),
        }
    }

    async fn send(&mut self, command: &Command) -> Result<(), ConnectionError> {
        self.state.ops.lock().unwrap().push(command.to_string());
        self.state
            .send_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.state.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub enum DialOutcome {
    Conn(Box<dyn Connection>),
    Fail,
}

/// Dialer with a scripted prefix of outcomes, counting every invocation.
/// Once the script is exhausted it either mints fresh `MockConn`s or fails,
/// depending on the constructor.
pub struct MockDialer {
    dials: AtomicUsize,
    script: Mutex<VecDeque<DialOutcome>>,
    fresh_when_empty: bool,
    fresh_states: Mutex<Vec<Arc<ConnState>>>,
}

impl MockDialer {
    /// Mints a fresh connection on every dial.
    pub fn unlimited() -> Arc<Self> {
        Arc::new(Self {
            dials: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            fresh_when_empty: true,
            fresh_states: Mutex::new(Vec::new()),
        })
    }

    /// Fails every dial.
    pub fn failing() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    /// Hands out `outcomes` in order, then fails.
    pub fn scripted(outcomes: Vec<DialOutcome>) -> Arc<Self> {
        Arc::new(Self {
            dials: AtomicUsize::new(0),
            script: Mutex::new(outcomes.into()),
            fresh_when_empty: false,
            fresh_states: Mutex::new(Vec::new()),
        })
    }

    /// Hands out the given connections in order, then fails.
    pub fn with_conns(conns: Vec<Box<dyn Connection>>) -> Arc<Self> {
        Self::scripted(conns.into_iter().map(DialOutcome::Conn).collect())
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// States of the connections minted after the script ran out.
    pub fn fresh_states(&self) -> Vec<Arc<ConnState>> {
        self.fresh_states.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self) -> Result<Box<dyn Connection>, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            return match outcome {
                DialOutcome::Conn(conn) => Ok(conn),
                DialOutcome::Fail => Err(DialError::Connect("scripted dial failure".to_string())),
            };
        }

        if self.fresh_when_empty {
            let (conn, state) = MockConn::new();
            self.fresh_states.lock().unwrap().push(state);
            return Ok(conn);
        }

        Err(DialError::Connect("dialer exhausted".to_string()))
    }
}

/// Gate that allows a fixed number of dial attempts, then reports an open
/// circuit without invoking the dialer.
pub struct TrippingGate {
    remaining: AtomicUsize,
}

impl TrippingGate {
    pub fn allow(attempts: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(attempts),
        })
    }
}

#[async_trait]
impl BreakerGate for TrippingGate {
    async fn dial(&self, dialer: &dyn Dialer) -> Result<Box<dyn Connection>, BreakerError> {
        let allowed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(BreakerError::Open);
        }

        Ok(dialer.dial().await?)
    }
}
