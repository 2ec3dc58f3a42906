use crate::model::ProviderId;

/// Faults raised by a provider adapter while opening the upstream call.
///
/// Each variant maps onto one upstream termination reason; nothing has been
/// streamed when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// The upstream call could not be established (DNS, TCP, TLS, timeout).
    #[error("upstream connect failed ({provider}): {message}")]
    Connect {
        provider: ProviderId,
        message: String,
    },
    /// The upstream answered with a non-success status.
    #[error("upstream returned status {status} ({provider}): {body}")]
    Status {
        provider: ProviderId,
        status: u16,
        body: String,
    },
    /// The upstream answered successfully but sent no body.
    #[error("upstream returned an empty body ({provider})")]
    EmptyBody { provider: ProviderId },
}

impl UpstreamError {
    /// Creates a connect fault.
    pub fn connect(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Connect {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a status fault.
    pub fn status(provider: impl Into<ProviderId>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            provider: provider.into(),
            status,
            body: body.into(),
        }
    }

    /// Creates an empty-body fault.
    pub fn empty_body(provider: impl Into<ProviderId>) -> Self {
        Self::EmptyBody {
            provider: provider.into(),
        }
    }
}

/// I/O fault raised by a `RawSource` after the stream was opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream read failed ({provider}): {message}")]
pub struct SourceError {
    pub provider: ProviderId,
    pub message: String,
}

impl SourceError {
    pub fn new(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Failure while pushing an event to the client channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// Transient write failure; the stream keeps going.
    #[error("client channel write failed: {0}")]
    Io(String),
    /// The caller is gone; nothing more can be delivered.
    #[error("client channel closed")]
    Closed,
}

/// Failure reported by the record store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("record store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Rejection of a chat turn before any upstream call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnValidationError {
    #[error("missing required field `{0}` outside preview mode")]
    MissingField(&'static str),
    #[error("stream id must not be empty")]
    EmptyStreamId,
    #[error("stream `{0}` is already open")]
    DuplicateStream(String),
    #[error("at least one message is required")]
    NoMessages,
    #[error("model must not be empty")]
    EmptyModel,
    #[error("provider not found: {0}")]
    ProviderNotFound(ProviderId),
}

/// Top-level error type for building the service and its adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Invalid service or adapter configuration.
    #[error("config error: {0}")]
    Config(String),
    /// The streaming worker ended without reporting an outcome.
    #[error("stream worker failed: {0}")]
    Worker(String),
}
