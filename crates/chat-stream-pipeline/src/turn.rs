use crate::errors::TurnValidationError;
use crate::model::{ChatMessage, ModelRef, ProviderRequest, RequestOptions};

/// Identity of one chat turn, read-only to the pipeline.
///
/// `uid`, `chat_id` and `req_id` are required unless the turn is a preview.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatTurnContext {
    pub uid: Option<String>,
    pub chat_id: Option<String>,
    pub req_id: Option<String>,
    /// The turn regenerates an existing answer; its record is replaced.
    pub is_edit_replay: bool,
    /// Trial generation; nothing is persisted.
    pub is_preview: bool,
}

impl ChatTurnContext {
    pub fn validate(&self) -> Result<(), TurnValidationError> {
        if self.is_preview {
            return Ok(());
        }
        for (name, value) in [
            ("uid", &self.uid),
            ("chat_id", &self.chat_id),
            ("req_id", &self.req_id),
        ] {
            if value.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                return Err(TurnValidationError::MissingField(name));
            }
        }
        Ok(())
    }
}

/// Debug switches carried by the inbound request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebugFlags {
    pub preview: bool,
    pub edit_replay: bool,
}

/// Inbound trigger for one streamed chat turn.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatTurnRequest {
    pub uid: Option<String>,
    pub chat_id: Option<String>,
    pub req_id: Option<String>,
    /// Key under which the stream is registered for cancellation.
    pub stream_id: String,
    pub model: ModelRef,
    pub messages: Vec<ChatMessage>,
    pub options: RequestOptions,
    pub debug: DebugFlags,
}

impl ChatTurnRequest {
    /// Creates a request with a freshly generated stream id.
    pub fn new(model: ModelRef) -> Self {
        Self {
            uid: None,
            chat_id: None,
            req_id: None,
            stream_id: uuid::Uuid::new_v4().to_string(),
            model,
            messages: Vec::new(),
            options: RequestOptions::default(),
            debug: DebugFlags::default(),
        }
    }

    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn req_id(mut self, req_id: impl Into<String>) -> Self {
        self.req_id = Some(req_id.into());
        self
    }

    pub fn stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn preview(mut self, preview: bool) -> Self {
        self.debug.preview = preview;
        self
    }

    pub fn edit_replay(mut self, edit_replay: bool) -> Self {
        self.debug.edit_replay = edit_replay;
        self
    }

    /// Splits the request into the turn identity and the upstream request.
    pub(crate) fn into_parts(self) -> (ChatTurnContext, ProviderRequest) {
        let turn = ChatTurnContext {
            uid: self.uid,
            chat_id: self.chat_id,
            req_id: self.req_id,
            is_edit_replay: self.debug.edit_replay,
            is_preview: self.debug.preview,
        };
        let request = ProviderRequest {
            stream_id: self.stream_id,
            model: self.model,
            messages: self.messages,
            options: self.options,
        };
        (turn, request)
    }
}
