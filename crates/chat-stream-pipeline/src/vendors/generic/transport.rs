use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;

use crate::errors::{SourceError, UpstreamError};
use crate::model::ProviderId;
use crate::provider::RawSource;

pub(crate) type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, String>> + Send + 'static>>;

/// Splits an arbitrary chunked byte stream into text lines.
///
/// Accepts `\n` and `\r\n` terminators. Bytes are only decoded once a full
/// line is buffered, so multi-byte characters split across chunks survive.
#[derive(Default)]
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
    lines: VecDeque<String>,
}

impl LineDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            self.lines.push_back(decode_line(&line[..idx]));
        }
    }

    /// Flushes a trailing line that had no terminator.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.lines.push_back(decode_line(&rest));
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// `RawSource` over an HTTP response body.
pub(crate) struct HttpLineSource {
    provider: ProviderId,
    bytes: ByteStream,
    decoder: LineDecoder,
    pending_error: Option<SourceError>,
    eof: bool,
}

impl HttpLineSource {
    /// Waits for the first body bytes.
    ///
    /// A body that ends before yielding a single byte is an empty-body fault.
    /// A read failure at this point is deferred to the first `next_line`.
    pub async fn open(provider: ProviderId, mut bytes: ByteStream) -> Result<Self, UpstreamError> {
        let mut decoder = LineDecoder::default();
        let mut pending_error = None;
        loop {
            match bytes.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    decoder.push_chunk(&chunk);
                    break;
                }
                Some(Err(message)) => {
                    pending_error = Some(SourceError::new(provider.clone(), message));
                    break;
                }
                None => return Err(UpstreamError::empty_body(provider)),
            }
        }
        Ok(Self {
            provider,
            bytes,
            decoder,
            pending_error,
            eof: false,
        })
    }
}

#[async_trait::async_trait]
impl RawSource for HttpLineSource {
    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        loop {
            if let Some(line) = self.decoder.next_line() {
                return Ok(Some(line));
            }
            if let Some(err) = self.pending_error.take() {
                self.eof = true;
                return Err(err);
            }
            if self.eof {
                return Ok(None);
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => self.decoder.push_chunk(&chunk),
                Some(Err(message)) => {
                    self.pending_error = Some(SourceError::new(self.provider.clone(), message));
                }
                None => {
                    self.eof = true;
                    self.decoder.finish();
                }
            }
        }
    }
}

/// Renders a reqwest failure with its phase so logs tell timeouts apart.
pub(crate) fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_stream(chunks: Vec<Result<&'static str, &'static str>>) -> ByteStream {
        Box::pin(stream::iter(chunks.into_iter().map(|chunk| {
            chunk
                .map(|text| bytes::Bytes::from_static(text.as_bytes()))
                .map_err(ToOwned::to_owned)
        })))
    }

    async fn drain(source: &mut HttpLineSource) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().await.expect("read") {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn line_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = LineDecoder::default();
        decoder.push_chunk(b"data: {\"a\":\"hel");
        assert_eq!(decoder.next_line(), None);
        decoder.push_chunk(b"lo\"}\r\n\r\ndata: [DO");
        assert_eq!(decoder.next_line().as_deref(), Some("data: {\"a\":\"hello\"}"));
        assert_eq!(decoder.next_line().as_deref(), Some(""));
        assert_eq!(decoder.next_line(), None);
        decoder.push_chunk(b"NE]");
        decoder.finish();
        assert_eq!(decoder.next_line().as_deref(), Some("data: [DONE]"));
    }

    #[test]
    fn line_decoder_keeps_multibyte_chars_split_across_chunks() {
        let text = "data: 你好\n".as_bytes();
        let mut decoder = LineDecoder::default();
        decoder.push_chunk(&text[..8]);
        decoder.push_chunk(&text[8..]);
        assert_eq!(decoder.next_line().as_deref(), Some("data: 你好"));
    }

    #[tokio::test]
    async fn open_rejects_body_without_bytes() {
        let result = HttpLineSource::open(ProviderId::new("generic"), byte_stream(vec![Ok("")])).await;
        assert!(matches!(result, Err(UpstreamError::EmptyBody { .. })));
    }

    #[tokio::test]
    async fn source_yields_lines_across_chunks() {
        let mut source = HttpLineSource::open(
            ProviderId::new("generic"),
            byte_stream(vec![Ok("data: 1\nda"), Ok("ta: 2\n"), Ok("data: [DONE]")]),
        )
        .await
        .expect("open");
        assert_eq!(drain(&mut source).await, vec!["data: 1", "data: 2", "data: [DONE]"]);
    }

    #[tokio::test]
    async fn read_failure_surfaces_after_buffered_lines() {
        let mut source = HttpLineSource::open(
            ProviderId::new("generic"),
            byte_stream(vec![Ok("data: 1\n"), Err("connection reset")]),
        )
        .await
        .expect("open");
        assert_eq!(source.next_line().await, Ok(Some("data: 1".to_string())));
        let err = source.next_line().await.expect_err("read error");
        assert!(err.message.contains("connection reset"));
        assert_eq!(source.next_line().await, Ok(None));
    }

    #[tokio::test]
    async fn failure_on_first_read_is_deferred_to_next_line() {
        let mut source = HttpLineSource::open(
            ProviderId::new("generic"),
            byte_stream(vec![Err("reset before body")]),
        )
        .await
        .expect("open succeeds");
        assert!(source.next_line().await.is_err());
    }
}
