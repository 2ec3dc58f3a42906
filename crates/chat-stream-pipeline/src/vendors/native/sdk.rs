//! Seam to the vendor's callback-driven streaming SDK.
//!
//! The SDK owns its own connection and worker threads and reports progress
//! through a [`NativeListener`]. Callbacks may arrive on any thread.

use crate::model::ChatMessage;

use super::model::NativeModel;

/// Request handed to the SDK for one streamed completion.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeRequest {
    pub model: NativeModel,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// End-user id, when known.
    pub user: Option<String>,
}

/// One incremental response delivered by the SDK.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NativeResponse {
    /// Vendor status code; `0` means success.
    pub code: i64,
    pub message: Option<String>,
    /// Vendor session id.
    pub sid: String,
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    /// Tool invocations and citations reported alongside the answer.
    pub tool_calls: Vec<serde_json::Value>,
    /// Marks the final response of the stream.
    pub is_last: bool,
}

/// Failure reported by the SDK, either while connecting or mid-stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeFailure {
    /// Handshake status, when the server answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl NativeFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Callbacks invoked by the SDK over the lifetime of one stream.
pub trait NativeListener: Send {
    /// The connection is established and responses will follow.
    fn on_open(&mut self);
    fn on_response(&mut self, response: NativeResponse);
    fn on_failure(&mut self, failure: NativeFailure);
    /// The connection closed. No further callbacks follow.
    fn on_closed(&mut self);
}

/// Vendor SDK client capable of starting a streamed completion.
pub trait NativeSdkClient: Send + Sync {
    /// Starts the stream and returns immediately; progress is reported
    /// through `listener`. An `Err` means the SDK refused to start at all.
    fn stream(
        &self,
        request: NativeRequest,
        listener: Box<dyn NativeListener>,
    ) -> Result<(), NativeFailure>;
}
