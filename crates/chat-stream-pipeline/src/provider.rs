//! Contract shared by every upstream adapter.
//!
//! An adapter opens the upstream call and hands back a [`RawSource`] of
//! text lines in the OpenAI-compatible `data: <json>` shape. Everything
//! downstream (decoding, normalisation, emission, persistence) is written
//! once against this seam.

use std::collections::VecDeque;

use crate::errors::{SourceError, UpstreamError};
use crate::model::{ProviderId, ProviderRequest};
use crate::turn::ChatTurnContext;

/// Line source produced by a started upstream call.
#[async_trait::async_trait]
pub trait RawSource: Send {
    /// Reads the next line without its terminator.
    ///
    /// `Ok(None)` means the upstream body ended.
    async fn next_line(&mut self) -> Result<Option<String>, SourceError>;
}

/// Adapter that opens a streamed chat completion against one upstream.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Id matched against `ModelRef::provider`.
    fn id(&self) -> ProviderId;

    /// Issues the upstream request. No retries happen here.
    async fn start(
        &self,
        turn: &ChatTurnContext,
        request: &ProviderRequest,
    ) -> Result<Box<dyn RawSource>, UpstreamError>;
}

/// In-memory source over a fixed list of line results.
///
/// Used by tests and by adapters that already hold a complete response.
pub struct ScriptedSource {
    lines: VecDeque<Result<String, SourceError>>,
}

impl ScriptedSource {
    pub fn new(lines: impl IntoIterator<Item = Result<String, SourceError>>) -> Self {
        Self {
            lines: lines.into_iter().collect(),
        }
    }

    /// Source yielding the given lines and then EOF.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(lines.into_iter().map(|line| Ok(line.into())))
    }
}

#[async_trait::async_trait]
impl RawSource for ScriptedSource {
    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        self.lines.pop_front().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_source_replays_lines_then_eof() {
        let mut source = ScriptedSource::new(vec![
            Ok("data: a".to_string()),
            Err(SourceError::new("fake", "reset")),
        ]);
        assert_eq!(source.next_line().await, Ok(Some("data: a".to_string())));
        assert!(source.next_line().await.is_err());
        assert_eq!(source.next_line().await, Ok(None));
    }
}
