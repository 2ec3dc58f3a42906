use tracing::{trace, warn};

use crate::provider::RawSource;
use crate::registry::StreamRegistry;
use crate::stream::{Termination, TerminationReason};

/// Payload that marks the end of an upstream stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_MARKER: &str = "data:";

/// One decoded upstream line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawFrame {
    Data(String),
    End,
}

impl RawFrame {
    /// Extracts the frame from a `data:` line. Other lines and empty
    /// payloads (keep-alives) yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let payload = line.strip_prefix(DATA_MARKER)?.trim();
        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            return Some(Self::End);
        }
        Some(Self::Data(payload.to_string()))
    }
}

/// Outcome of one decoder step.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeStep {
    /// Payload of a `data:` frame, ready for the normalizer.
    Frame(String),
    Stop(Termination),
}

/// Pulls frames out of a line source, checking for cancellation around every
/// read.
pub struct FrameDecoder<'a> {
    registry: &'a StreamRegistry,
    stream_id: &'a str,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(registry: &'a StreamRegistry, stream_id: &'a str) -> Self {
        Self {
            registry,
            stream_id,
        }
    }

    /// Reads lines until one carries a frame or the stream stops.
    ///
    /// The cancel flag is checked before each read and right after a line
    /// arrives; a line read after cancellation is dropped unprocessed.
    pub async fn next_frame(&self, source: &mut dyn RawSource) -> DecodeStep {
        loop {
            if self.cancelled() {
                return DecodeStep::Stop(Termination::new(TerminationReason::ClientCancelled));
            }
            let line = match source.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    warn!(stream_id = self.stream_id, "upstream ended without end-of-stream sentinel");
                    return DecodeStep::Stop(Termination::new(TerminationReason::NormalEnd));
                }
                Err(err) => {
                    warn!(stream_id = self.stream_id, error = %err, "upstream read failed");
                    return DecodeStep::Stop(Termination::with_detail(
                        TerminationReason::ReadError,
                        err.message,
                    ));
                }
            };
            if self.cancelled() {
                return DecodeStep::Stop(Termination::new(TerminationReason::ClientCancelled));
            }
            match RawFrame::parse(&line) {
                Some(RawFrame::Data(payload)) => return DecodeStep::Frame(payload),
                Some(RawFrame::End) => {
                    return DecodeStep::Stop(Termination::new(TerminationReason::NormalEnd));
                }
                None => trace!(stream_id = self.stream_id, line = %line, "skipping non-data line"),
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.registry.is_cancelled(self.stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceError;
    use crate::provider::ScriptedSource;

    /// Source that cancels the stream once a given number of lines were read.
    struct CancellingSource<'a> {
        inner: ScriptedSource,
        registry: &'a StreamRegistry,
        cancel_after: usize,
        reads: usize,
    }

    #[async_trait::async_trait]
    impl<'a> RawSource for CancellingSource<'a> {
        async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
            self.reads += 1;
            if self.reads == self.cancel_after {
                self.registry.cancel("s1");
            }
            self.inner.next_line().await
        }
    }

    fn registry() -> StreamRegistry {
        let registry = StreamRegistry::new();
        registry.open("s1");
        registry
    }

    #[test]
    fn parse_recognises_data_sentinel_and_noise() {
        assert_eq!(RawFrame::parse("data: {\"a\":1}"), Some(RawFrame::Data("{\"a\":1}".into())));
        assert_eq!(RawFrame::parse("data:[DONE]"), Some(RawFrame::End));
        assert_eq!(RawFrame::parse("data: [DONE] "), Some(RawFrame::End));
        assert_eq!(RawFrame::parse("event: message"), None);
        assert_eq!(RawFrame::parse(": keep-alive"), None);
        assert_eq!(RawFrame::parse("data:   "), None);
        assert_eq!(RawFrame::parse(""), None);
    }

    #[tokio::test]
    async fn skips_noise_and_stops_at_sentinel() {
        let registry = registry();
        let decoder = FrameDecoder::new(&registry, "s1");
        let mut source = ScriptedSource::from_lines([
            "event: chunk",
            "data: one",
            "",
            "data: [DONE]",
            "data: after-done",
        ]);
        assert_eq!(decoder.next_frame(&mut source).await, DecodeStep::Frame("one".into()));
        assert_eq!(
            decoder.next_frame(&mut source).await,
            DecodeStep::Stop(Termination::new(TerminationReason::NormalEnd))
        );
    }

    #[tokio::test]
    async fn eof_without_sentinel_is_normal_end() {
        let registry = registry();
        let decoder = FrameDecoder::new(&registry, "s1");
        let mut source = ScriptedSource::from_lines(["data: one"]);
        decoder.next_frame(&mut source).await;
        assert_eq!(
            decoder.next_frame(&mut source).await,
            DecodeStep::Stop(Termination::new(TerminationReason::NormalEnd))
        );
    }

    #[tokio::test]
    async fn read_fault_stops_with_read_error() {
        let registry = registry();
        let decoder = FrameDecoder::new(&registry, "s1");
        let mut source = ScriptedSource::new(vec![Err(SourceError::new("fake", "reset by peer"))]);
        assert_eq!(
            decoder.next_frame(&mut source).await,
            DecodeStep::Stop(Termination::with_detail(TerminationReason::ReadError, "reset by peer"))
        );
    }

    #[tokio::test]
    async fn cancellation_before_read_consumes_nothing() {
        let registry = registry();
        registry.cancel("s1");
        let decoder = FrameDecoder::new(&registry, "s1");
        let mut source = ScriptedSource::from_lines(["data: one"]);
        assert_eq!(
            decoder.next_frame(&mut source).await,
            DecodeStep::Stop(Termination::new(TerminationReason::ClientCancelled))
        );
        assert_eq!(source.next_line().await, Ok(Some("data: one".into())));
    }

    #[tokio::test]
    async fn line_obtained_after_cancellation_is_dropped() {
        let registry = registry();
        let decoder = FrameDecoder::new(&registry, "s1");
        let mut source = CancellingSource {
            inner: ScriptedSource::from_lines(["data: one", "data: two"]),
            registry: &registry,
            cancel_after: 2,
            reads: 0,
        };
        assert_eq!(decoder.next_frame(&mut source).await, DecodeStep::Frame("one".into()));
        assert_eq!(
            decoder.next_frame(&mut source).await,
            DecodeStep::Stop(Termination::new(TerminationReason::ClientCancelled))
        );
    }
}
