use super::{Transport, TransportResult, TransportTrace};
use async_trait::async_trait;
use lettre::{AsyncSendmailTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::PathBuf;
use tracing::{debug, error};

/// Local delivery through the system `sendmail` binary
pub struct SendmailTransport {
    command: Option<PathBuf>,
    transport: AsyncSendmailTransport<Tokio1Executor>,
}

impl SendmailTransport {
    pub fn new() -> Self {
        Self {
            command: None,
            transport: AsyncSendmailTransport::<Tokio1Executor>::new(),
        }
    }

    pub fn with_command(command: PathBuf) -> Self {
        Self {
            transport: AsyncSendmailTransport::<Tokio1Executor>::new_with_command(command.clone()),
            command: Some(command),
        }
    }
}

impl Default for SendmailTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SendmailTransport {
    fn name(&self) -> &str {
        "sendmail"
    }

    async fn deliver(&self, message: &Message, trace: &mut TransportTrace) -> TransportResult<()> {
        let command = self
            .command
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "sendmail".to_string());
        trace.record(format!("Piping message to {}", command));

        match self.transport.send(message.clone()).await {
            Ok(()) => {
                debug!("Message handed to {}", command);
                trace.record("Accepted by local transport");
                Ok(())
            }
            Err(e) => {
                error!("Local transport failed: {}", e);
                trace.record(format!("Error: {}", e));
                Err(e.into())
            }
        }
    }
}
