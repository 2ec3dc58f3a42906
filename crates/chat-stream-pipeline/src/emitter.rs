use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;

use crate::errors::EmitError;
use crate::normalizer::{NormalizedEvent, PARSE_FAILURE_CODE};
use crate::stream::{OutboundEvent, Termination, TerminationReason};

/// Caller-facing live channel.
#[async_trait::async_trait]
pub trait ClientEmitter: Send {
    /// Delivers one event.
    ///
    /// `EmitError::Closed` means the caller is gone and no further event can
    /// be delivered; `EmitError::Io` is a transient failure.
    async fn send(&mut self, event: OutboundEvent) -> Result<(), EmitError>;
}

/// Emitter backed by a bounded tokio channel. A dropped receiver reads as a
/// disconnected client.
pub struct ChannelEmitter {
    tx: mpsc::Sender<OutboundEvent>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self { tx }
    }

    /// Creates an emitter and the receiver the caller reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait::async_trait]
impl ClientEmitter for ChannelEmitter {
    async fn send(&mut self, event: OutboundEvent) -> Result<(), EmitError> {
        self.tx.send(event).await.map_err(|_| EmitError::Closed)
    }
}

/// Emitter writing SSE `data:` frames to an async byte sink, such as a
/// hijacked HTTP response body or a socket.
pub struct SseEmitter<W> {
    writer: W,
}

impl<W> SseEmitter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait::async_trait]
impl<W> ClientEmitter for SseEmitter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, event: OutboundEvent) -> Result<(), EmitError> {
        let frame = event
            .to_sse_frame()
            .map_err(|e| EmitError::Io(format!("failed to encode event: {e}")))?;
        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(classify_io_error)?;
        self.writer.flush().await.map_err(classify_io_error)
    }
}

fn classify_io_error(err: io::Error) -> EmitError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => EmitError::Closed,
        _ => EmitError::Io(err.to_string()),
    }
}

/// Outbound form of a normalized event. Parse failures have none.
pub fn outbound_event(event: &NormalizedEvent) -> Option<OutboundEvent> {
    match event {
        NormalizedEvent::ContentDelta { text } => Some(OutboundEvent::Content {
            delta: text.clone(),
            replace: false,
        }),
        NormalizedEvent::ReasoningDelta { text } => Some(OutboundEvent::Reasoning {
            delta: text.clone(),
        }),
        NormalizedEvent::ToolTrace { kind, payload } => Some(OutboundEvent::Trace {
            kind: kind.clone(),
            payload: payload.clone(),
        }),
        NormalizedEvent::VendorError {
            code: PARSE_FAILURE_CODE,
            ..
        } => None,
        NormalizedEvent::VendorError {
            content_override: Some(text),
            ..
        } => Some(OutboundEvent::Content {
            delta: text.clone(),
            replace: true,
        }),
        NormalizedEvent::VendorError { message, .. } => Some(OutboundEvent::Content {
            delta: message.clone(),
            replace: false,
        }),
        NormalizedEvent::StreamEnd => Some(OutboundEvent::Complete),
    }
}

/// Final event for a termination, or `None` when the caller is already gone.
pub fn terminal_event(termination: &Termination) -> Option<OutboundEvent> {
    let fallback = match termination.reason {
        TerminationReason::NormalEnd => return Some(OutboundEvent::Complete),
        TerminationReason::ClientCancelled => return Some(OutboundEvent::Interrupted),
        TerminationReason::ClientDisconnected => return None,
        TerminationReason::UpstreamConnectFailed => "failed to connect to the model service",
        TerminationReason::UpstreamStatusError => "the model service rejected the request",
        TerminationReason::UpstreamEmptyBody => "the model service returned an empty response",
        TerminationReason::ReadError => "the model response was interrupted",
    };
    let message = match &termination.detail {
        Some(detail) => format!("{fallback}: {detail}"),
        None => fallback.to_string(),
    };
    Some(OutboundEvent::Error { message })
}
