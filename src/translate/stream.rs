// Line-oriented decoding of streamed HTTP bodies into translated chunks.
//
// Both backends receive newline-delimited payloads (SSE `data:` lines for the
// remote API, one JSON object per line for Ollama). The byte stream is split
// into complete lines before decoding so multi-byte characters that straddle
// network reads are never cut in half.

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

use super::ChunkStream;
use crate::error::TranslationError;

/// Reported when a body ends before the protocol's end marker.
pub const TRUNCATED_MESSAGE: &str = "stream ended before completion";

/// What one protocol line contributed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineEvent {
    pub chunk: Option<String>,
    /// No more content follows this line
    pub done: bool,
}

impl LineEvent {
    pub fn skip() -> Self {
        Self::default()
    }

    pub fn chunk(text: impl Into<String>) -> Self {
        Self {
            chunk: Some(text.into()),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            chunk: None,
            done: true,
        }
    }
}

/// Accumulates bytes and hands out complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

struct Decoder<S, F> {
    bytes: Pin<Box<S>>,
    lines: LineBuffer,
    ready: VecDeque<Result<String, TranslationError>>,
    finished: bool,
    parse: F,
}

impl<S, F> Decoder<S, F>
where
    F: Fn(&str) -> Result<LineEvent, TranslationError>,
{
    fn handle(&mut self, line: &str) {
        if self.finished {
            return;
        }
        match (self.parse)(line) {
            Ok(event) => {
                if let Some(chunk) = event.chunk.filter(|c| !c.is_empty()) {
                    self.ready.push_back(Ok(chunk));
                }
                if event.done {
                    self.finished = true;
                }
            }
            Err(e) => {
                self.ready.push_back(Err(e));
                self.finished = true;
            }
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        for line in self.lines.push(bytes) {
            self.handle(&line);
        }
    }

    /// The body ended. Unless the parser already saw the end marker or an
    /// error, the response was cut short.
    fn close(&mut self) {
        if let Some(line) = self.lines.finish() {
            self.handle(&line);
        }
        if !self.finished {
            self.ready.push_back(Err(TranslationError::InvalidResponse(
                TRUNCATED_MESSAGE.to_string(),
            )));
        }
        self.finished = true;
    }
}

/// Turn a streamed body into a chunk stream using a per-line parser.
///
/// The stream ends after the parser reports `done` or right after the first
/// error it yields. A body that ends before `done` yields an
/// `InvalidResponse` error.
pub fn decode_lines<S, B, E, F>(bytes: S, parse: F) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<TranslationError> + Send + 'static,
    F: Fn(&str) -> Result<LineEvent, TranslationError> + Send + 'static,
{
    let decoder = Decoder {
        bytes: Box::pin(bytes),
        lines: LineBuffer::default(),
        ready: VecDeque::new(),
        finished: false,
        parse,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(item) = decoder.ready.pop_front() {
                return Some((item, decoder));
            }
            if decoder.finished {
                return None;
            }
            match decoder.bytes.next().await {
                Some(Ok(bytes)) => decoder.feed(bytes.as_ref()),
                Some(Err(e)) => {
                    decoder.ready.push_back(Err(e.into()));
                    decoder.finished = true;
                }
                None => decoder.close(),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::iter;

    fn plain(line: &str) -> Result<LineEvent, TranslationError> {
        match line.trim() {
            "" => Ok(LineEvent::skip()),
            "END" => Ok(LineEvent::done()),
            "BAD" => Err(TranslationError::InvalidResponse("bad line".into())),
            text => Ok(LineEvent::chunk(text)),
        }
    }

    async fn collect(parts: Vec<&'static [u8]>) -> Vec<Result<String, TranslationError>> {
        let body = iter(parts.into_iter().map(Ok::<_, TranslationError>));
        decode_lines(body, plain).collect().await
    }

    #[test]
    fn test_line_buffer_splits_and_keeps_remainder() {
        let mut buffer = LineBuffer::default();
        assert_eq!(buffer.push(b"one\r\ntw"), vec!["one".to_string()]);
        assert_eq!(buffer.push(b"o\n"), vec!["two".to_string()]);
        assert_eq!(buffer.push(b"three"), Vec::<String>::new());
        assert_eq!(buffer.finish(), Some("three".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_joins_split_utf8() {
        let bytes = "你好\n".as_bytes();
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&bytes[..2]).is_empty());
        assert_eq!(buffer.push(&bytes[2..]), vec!["你好".to_string()]);
    }

    #[tokio::test]
    async fn test_chunks_in_order_until_done() {
        let items = collect(vec![&b"a\n\nb\n"[..], &b"END\nc\n"[..]]).await;
        assert_eq!(items, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn test_trailing_end_marker_without_newline() {
        let items = collect(vec![&b"a\nb\nEND"[..]]).await;
        assert_eq!(items, vec![Ok("a".to_string()), Ok("b".to_string())]);
    }

    #[tokio::test]
    async fn test_body_ending_before_done_is_truncated() {
        let items = collect(vec![&b"a\n"[..], &b"b"[..]]).await;
        assert_eq!(
            items,
            vec![
                Ok("a".to_string()),
                Ok("b".to_string()),
                Err(TranslationError::InvalidResponse(TRUNCATED_MESSAGE.into()))
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_body_is_truncated() {
        let items = collect(Vec::new()).await;
        assert_eq!(
            items,
            vec![Err(TranslationError::InvalidResponse(TRUNCATED_MESSAGE.into()))]
        );
    }

    #[tokio::test]
    async fn test_parse_error_ends_stream() {
        let items = collect(vec![&b"a\nBAD\nb\n"[..]]).await;
        assert_eq!(
            items,
            vec![
                Ok("a".to_string()),
                Err(TranslationError::InvalidResponse("bad line".into()))
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let body = iter(vec![
            Ok(&b"a\n"[..]),
            Err(TranslationError::Network("connection reset".into())),
            Ok(&b"b\n"[..]),
        ]);
        let items: Vec<_> = decode_lines(body, plain).collect().await;
        assert_eq!(
            items,
            vec![
                Ok("a".to_string()),
                Err(TranslationError::Network("connection reset".into()))
            ]
        );
    }
}
