//! Incremental newline-delimited JSON decoding.
//!
//! Bytes are buffered only until the next `\n`; each complete line is decoded
//! lazily when the consumer asks for the next record, so a terminal record
//! stops decoding even if later lines already arrived in the same chunk.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;

use crate::errors::OllamaError;

/// Raw response body as delivered by the transport.
pub(crate) type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, OllamaError>> + Send + 'static>>;

/// One decoded line of a newline-delimited JSON body.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Record {
    /// The line parsed as JSON.
    Value(serde_json::Value),
    /// The line was not valid JSON. Only this line is lost.
    Malformed { line: String, error: String },
}

/// Splits a byte stream into complete lines.
///
/// Consumed bytes are reclaimed once per chunk, so splitting a chunk is linear
/// in its size. A line longer than `max_line_bytes` without a newline is an
/// error.
pub(crate) struct LineSplitter {
    buf: Vec<u8>,
    start: usize,
    scanned: usize,
    max_line_bytes: usize,
}

impl LineSplitter {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            max_line_bytes,
        }
    }

    /// Appends a chunk and returns every line it completed, without the
    /// trailing `\n` (and `\r`, if present).
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, OllamaError> {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let mut line = &self.buf[self.start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            lines.push(line.to_vec());
            self.start = end + 1;
            self.scanned = self.start;
        }
        self.scanned = self.buf.len();

        if self.pending() > self.max_line_bytes {
            return Err(OllamaError::protocol(format!(
                "line exceeds {} bytes without a newline",
                self.max_line_bytes
            )));
        }
        Ok(lines)
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.start
    }
}

/// Decodes one line. Blank lines yield `None`.
pub(crate) fn decode_line(line: &[u8]) -> Option<Record> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(match serde_json::from_str(trimmed) {
        Ok(value) => Record::Value(value),
        Err(e) => Record::Malformed {
            line: trimmed.to_string(),
            error: e.to_string(),
        },
    })
}

/// Turns a byte stream into a lazy, forward-only stream of records.
///
/// Read errors and oversized lines are yielded once and end the sequence. A
/// partial line left over when the source ends is discarded.
pub(crate) fn ndjson_records(
    bytes: ByteStream,
    max_line_bytes: usize,
) -> impl futures::Stream<Item = Result<Record, OllamaError>> + Send {
    struct State {
        bytes: ByteStream,
        splitter: LineSplitter,
        lines: VecDeque<Vec<u8>>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            splitter: LineSplitter::new(max_line_bytes),
            lines: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                while let Some(line) = state.lines.pop_front() {
                    if let Some(record) = decode_line(&line) {
                        return Ok(Some((record, state)));
                    }
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.lines.extend(state.splitter.push_chunk(&chunk)?);
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        if state.splitter.pending() > 0 {
                            tracing::debug!(
                                bytes = state.splitter.pending(),
                                "discarding trailing partial line at end of stream"
                            );
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
pub(crate) fn byte_stream_from<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Result<Bytes, OllamaError>>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(chunks))
}
