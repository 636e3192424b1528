//! Connection handler that dispatches JSONL requests.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::supervisor::Supervisor;
use crate::transport::{ConnectionHandler, ConnectionStream, MAX_REQUEST_BYTES, read_request_line};

use super::DISPATCH_TARGET;
use super::errors::DispatchError;
use super::request::ParsedRequest;
use super::response::ResponseWriter;
use super::router::{MethodRouter, Routed};

/// Connection handler that parses requests, routes them to the supervisor
/// and writes the reply.
#[derive(Debug, Clone)]
pub(crate) struct DispatchConnectionHandler {
    router: MethodRouter,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
}

impl DispatchConnectionHandler {
    /// `shutdown` is cancelled after a `killMe` reply has been written.
    pub(crate) fn new(
        supervisor: Arc<Supervisor>,
        shutdown: CancellationToken,
        socket: String,
    ) -> Self {
        Self {
            router: MethodRouter::new(Arc::clone(&supervisor), socket),
            supervisor,
            shutdown,
        }
    }

    /// Serves one connection. Generic over the stream so tests can drive it
    /// through an in-memory duplex pipe.
    pub(crate) async fn serve<S>(&self, stream: S)
    where
        S: tokio::io::AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut writer = ResponseWriter::new(write_half);

        let request = match read_request(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(target: DISPATCH_TARGET, "client disconnected without request");
                return;
            }
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "rejected request");
                reply_error(&mut writer, &error).await;
                return;
            }
        };

        debug!(target: DISPATCH_TARGET, method = %request.method, "dispatching request");
        match self.router.route(request.method, request.params).await {
            Ok(Routed::Reply(data)) => {
                if let Err(error) = writer.write_result(data).await {
                    warn!(target: DISPATCH_TARGET, %error, "failed to write result");
                }
            }
            Ok(Routed::Shutdown(data)) => {
                if let Err(error) = writer.write_result(data).await {
                    warn!(target: DISPATCH_TARGET, %error, "failed to write result");
                }
                info!(target: DISPATCH_TARGET, "shutdown requested by client");
                self.shutdown.cancel();
            }
            Ok(Routed::Subscribe(topics)) => {
                self.stream_events(&mut reader, &mut writer, &topics).await;
            }
            Err(error) => {
                debug!(target: DISPATCH_TARGET, method = %request.method, %error, "request failed");
                reply_error(&mut writer, &error).await;
            }
        }
    }

    async fn stream_events<R, W>(
        &self,
        reader: &mut R,
        writer: &mut ResponseWriter<W>,
        topics: &[String],
    ) where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut events = self.supervisor.subscribe();
        let mut discard = Vec::new();
        debug!(target: DISPATCH_TARGET, ?topics, "subscriber attached");
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                // Subscribers send nothing further; EOF or an error means
                // the client went away.
                read = reader.read_until(b'\n', &mut discard) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(_) => discard.clear(),
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if !event.matches(topics) {
                            continue;
                        }
                        if writer.write_event(event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: DISPATCH_TARGET, skipped, "subscriber lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(target: DISPATCH_TARGET, "subscriber detached");
    }
}

#[async_trait]
impl ConnectionHandler for DispatchConnectionHandler {
    async fn handle(&self, stream: ConnectionStream) {
        self.serve(stream).await;
    }
}

async fn read_request<R>(reader: &mut R) -> Result<Option<ParsedRequest>, DispatchError>
where
    R: AsyncBufRead + Unpin,
{
    match read_request_line(reader).await {
        Ok(Some(line)) => ParsedRequest::parse(&line).map(Some),
        Ok(None) => Ok(None),
        Err(error) if error.kind() == io::ErrorKind::InvalidData => {
            Err(DispatchError::RequestTooLarge {
                max_size: MAX_REQUEST_BYTES,
            })
        }
        Err(error) => Err(error.into()),
    }
}

async fn reply_error<W>(writer: &mut ResponseWriter<W>, error: &DispatchError)
where
    W: AsyncWrite + Unpin,
{
    if let Err(write_error) = writer.write_error(error).await {
        warn!(target: DISPATCH_TARGET, error = %write_error, "failed to write error");
    }
}
