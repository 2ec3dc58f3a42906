use std::fmt;

/// Why a stream stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    NormalEnd,
    ClientCancelled,
    UpstreamConnectFailed,
    UpstreamStatusError,
    UpstreamEmptyBody,
    ReadError,
    ClientDisconnected,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NormalEnd => "normal_end",
            Self::ClientCancelled => "client_cancelled",
            Self::UpstreamConnectFailed => "upstream_connect_failed",
            Self::UpstreamStatusError => "upstream_status_error",
            Self::UpstreamEmptyBody => "upstream_empty_body",
            Self::ReadError => "read_error",
            Self::ClientDisconnected => "client_disconnected",
        }
    }

    /// Upstream faults raised before any frame was read.
    pub fn is_upstream_fault(self) -> bool {
        matches!(
            self,
            Self::UpstreamConnectFailed | Self::UpstreamStatusError | Self::UpstreamEmptyBody
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Termination reason plus a human-readable detail for fault paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Termination {
    pub reason: TerminationReason,
    pub detail: Option<String>,
}

impl Termination {
    pub fn new(reason: TerminationReason) -> Self {
        Self {
            reason,
            detail: None,
        }
    }

    pub fn with_detail(reason: TerminationReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }
}

/// Event pushed to the caller's live channel.
///
/// Serialises as `{"type": "...", ...}`. A stream carries any number of
/// `content`/`reasoning`/`trace` events followed by at most one of
/// `complete`, `interrupted` or `error`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    Content {
        delta: String,
        /// The delta replaces everything streamed so far for this turn.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        replace: bool,
    },
    Reasoning {
        delta: String,
    },
    Trace {
        kind: String,
        payload: serde_json::Value,
    },
    Complete,
    Interrupted,
    Error {
        message: String,
    },
}

impl OutboundEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Interrupted | Self::Error { .. }
        )
    }

    /// Renders the event as one SSE `data:` frame.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_events_serialize_with_type_tag() {
        let content = OutboundEvent::Content {
            delta: "hi".into(),
            replace: false,
        };
        assert_eq!(
            serde_json::to_value(&content).expect("json"),
            serde_json::json!({"type": "content", "delta": "hi"})
        );
        let replace = OutboundEvent::Content {
            delta: "blocked".into(),
            replace: true,
        };
        assert_eq!(
            serde_json::to_value(&replace).expect("json")["replace"],
            serde_json::json!(true)
        );
        assert_eq!(
            serde_json::to_value(OutboundEvent::Complete).expect("json"),
            serde_json::json!({"type": "complete"})
        );
        assert_eq!(
            serde_json::to_value(OutboundEvent::Error {
                message: "boom".into()
            })
            .expect("json"),
            serde_json::json!({"type": "error", "message": "boom"})
        );
    }

    #[test]
    fn sse_frame_is_data_line_with_blank_separator() {
        let frame = OutboundEvent::Interrupted.to_sse_frame().expect("frame");
        assert_eq!(frame, "data: {\"type\":\"interrupted\"}\n\n");
    }

    #[test]
    fn only_final_events_are_terminal() {
        assert!(OutboundEvent::Complete.is_terminal());
        assert!(OutboundEvent::Interrupted.is_terminal());
        assert!(
            !OutboundEvent::Reasoning {
                delta: "x".into()
            }
            .is_terminal()
        );
    }

    #[test]
    fn upstream_faults_are_classified() {
        assert!(TerminationReason::UpstreamEmptyBody.is_upstream_fault());
        assert!(!TerminationReason::ReadError.is_upstream_fault());
        assert_eq!(TerminationReason::ClientCancelled.to_string(), "client_cancelled");
    }
}
