//! Response serialization helpers for the dispatch loop.

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use drover_daemon_types::{BusEvent, DaemonMessage};

use super::errors::DispatchError;

/// Writer that serializes daemon messages to a stream, one JSONL line each.
pub(crate) struct ResponseWriter<W> {
    writer: W,
}

impl<W> ResponseWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a daemon message as a JSONL line and flushes it.
    pub(crate) async fn write_message(
        &mut self,
        message: &DaemonMessage,
    ) -> Result<(), DispatchError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn write_result(&mut self, data: Value) -> Result<(), DispatchError> {
        self.write_message(&DaemonMessage::Result { data }).await
    }

    pub(crate) async fn write_error(&mut self, error: &DispatchError) -> Result<(), DispatchError> {
        self.write_message(&DaemonMessage::Error {
            error: error.to_rpc(),
        })
        .await
    }

    pub(crate) async fn write_event(&mut self, event: BusEvent) -> Result<(), DispatchError> {
        self.write_message(&DaemonMessage::Event { event }).await
    }
}
