use crate::core::client::{Client, ClientError};
use crate::core::command::Command;
use crate::core::resp::RespValue;

/// An ordered batch of commands processed in a single request/response
/// exchange, reducing bandwidth and latency around communication with the
/// remote server.
///
/// The MULTI/EXEC bracketing is added implicitly when the pipeline runs.
pub struct Pipeline<'a> {
    client: &'a Client,
    commands: Vec<Command>,
}

impl<'a> Pipeline<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self {
            client,
            commands: Vec::new(),
        }
    }

    /// Attach a command to this pipeline. Nothing is sent to the remote
    /// server until `run` is invoked.
    pub fn add(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Send all attached commands in a single request and return the EXEC
    /// reply. Consumes the pipeline: a batch is submitted at most once.
    pub async fn run(self) -> Result<RespValue, ClientError> {
        self.client.run_batch_with_retry(&self.commands).await
    }
}
