//! Vendor frame payloads → [`NormalizedEvent`].
//!
//! Accepted shape:
//!
//! ```text
//! {"code": <int?>, "message": <str?>, "sid": <str?>,
//!  "choices": [{"delta": {"content": <str?>, "reasoning_content": <str?>,
//!                         "tool_calls": [<object>...] | <object>}}]}
//! ```
//!
//! Only the first choice contributes answer and reasoning text. Tool calls
//! are collected from every choice because some vendors put the visible
//! answer and the citation trace in separate slots of the same frame.

use serde::Deserialize;
use tracing::warn;

/// Code attached to the synthetic error emitted for unparseable frames.
pub const PARSE_FAILURE_CODE: i64 = -1;

const DEFAULT_TRACE_KIND: &str = "tool_call";

/// Pipeline-internal event every adapter's output is reduced to.
#[derive(Clone, Debug, PartialEq)]
pub enum NormalizedEvent {
    ContentDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolTrace {
        kind: String,
        payload: serde_json::Value,
    },
    VendorError {
        code: i64,
        message: String,
        /// Replacement for the whole answer of this turn (content-policy codes).
        content_override: Option<String>,
    },
    StreamEnd,
}

/// One row of the vendor fault table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FallbackMessage {
    pub code: i64,
    pub message: &'static str,
    /// Previously streamed content must be replaced by `message`.
    pub overrides_content: bool,
}

const FALLBACK_MESSAGES: &[FallbackMessage] = &[
    FallbackMessage {
        code: 10013,
        message: "Your question touches on content I can't discuss. Please try rephrasing it.",
        overrides_content: true,
    },
    FallbackMessage {
        code: 10014,
        message: "I can't provide that answer. Let's talk about something else.",
        overrides_content: true,
    },
    FallbackMessage {
        code: 10019,
        message: "The answer may contain sensitive content and has been withheld.",
        overrides_content: true,
    },
    FallbackMessage {
        code: 10907,
        message: "The conversation is too long. Please start a new chat.",
        overrides_content: false,
    },
    FallbackMessage {
        code: 11200,
        message: "The model service is not authorised for this application.",
        overrides_content: false,
    },
    FallbackMessage {
        code: 11201,
        message: "Today's model quota has been used up. Please try again tomorrow.",
        overrides_content: false,
    },
    FallbackMessage {
        code: 11202,
        message: "Too many requests right now. Please try again in a moment.",
        overrides_content: false,
    },
    FallbackMessage {
        code: 11203,
        message: "The model service is busy. Please try again in a moment.",
        overrides_content: false,
    },
];

/// Looks up the table row for a vendor code.
pub fn fallback_message(code: i64) -> Option<&'static FallbackMessage> {
    FALLBACK_MESSAGES.iter().find(|entry| entry.code == code)
}

#[derive(Debug, Default, Deserialize)]
struct WireFrame {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<serde_json::Value>,
}

/// Parses one frame payload.
///
/// Never fails: a malformed payload becomes a `VendorError` carrying
/// [`PARSE_FAILURE_CODE`]. A fault event, when present, precedes the deltas
/// of the same frame.
pub fn normalize(payload: &str) -> Vec<NormalizedEvent> {
    let frame: WireFrame = match serde_json::from_str(payload) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "unparseable upstream frame");
            return vec![NormalizedEvent::VendorError {
                code: PARSE_FAILURE_CODE,
                message: format!("failed to parse upstream frame: {err}"),
                content_override: None,
            }];
        }
    };

    let mut events = Vec::new();
    if let Some(code) = frame.code.filter(|code| *code != 0) {
        warn!(code, sid = frame.sid.as_deref().unwrap_or_default(), "vendor fault in stream");
        events.push(vendor_error(code, frame.message.as_deref()));
    }

    let mut choices = frame.choices.into_iter();
    if let Some(first) = choices.next().and_then(|choice| choice.delta) {
        if let Some(text) = first.reasoning_content.filter(|t| !t.is_empty()) {
            events.push(NormalizedEvent::ReasoningDelta { text });
        }
        if let Some(text) = first.content.filter(|t| !t.is_empty()) {
            events.push(NormalizedEvent::ContentDelta { text });
        }
        push_tool_traces(&mut events, first.tool_calls);
    }
    for delta in choices.filter_map(|choice| choice.delta) {
        push_tool_traces(&mut events, delta.tool_calls);
    }
    events
}

fn vendor_error(code: i64, upstream_message: Option<&str>) -> NormalizedEvent {
    match fallback_message(code) {
        Some(entry) => NormalizedEvent::VendorError {
            code,
            message: entry.message.to_string(),
            content_override: entry
                .overrides_content
                .then(|| entry.message.to_string()),
        },
        None => NormalizedEvent::VendorError {
            code,
            message: match upstream_message.map(str::trim).filter(|m| !m.is_empty()) {
                Some(detail) => format!("The model service returned an error ({code}): {detail}"),
                None => format!("The model service returned an error ({code})."),
            },
            content_override: None,
        },
    }
}

fn push_tool_traces(events: &mut Vec<NormalizedEvent>, tool_calls: Option<serde_json::Value>) {
    let entries = match tool_calls {
        Some(serde_json::Value::Array(entries)) => entries,
        Some(serde_json::Value::Null) | None => return,
        Some(entry) => vec![entry],
    };
    for payload in entries {
        let kind = payload
            .get("type")
            .and_then(|v| v.as_str())
            .filter(|kind| !kind.is_empty())
            .unwrap_or(DEFAULT_TRACE_KIND)
            .to_string();
        events.push(NormalizedEvent::ToolTrace { kind, payload });
    }
}
