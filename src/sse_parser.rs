//! Incremental Server-Sent-Events parser.
//!
//! A small stream adapter that turns a raw byte stream into assembled SSE
//! frames. It buffers partial reads, splits on `\n` / `\r\n`, strips field
//! prefixes, and emits one frame per blank-line boundary. Both the model
//! backend client and the wire decoder build on it, so the framing logic
//! is testable without a socket.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

/// One parsed SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SseLine {
    /// A `data:` line, prefix stripped.
    Data(String),
    /// An `event:` line with the event type.
    Event(String),
    /// Blank line: frame boundary.
    Empty,
    /// Comment or unknown field, ignored during assembly.
    Comment,
}

fn parse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }
    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.strip_prefix(' ').unwrap_or(rest).to_string());
    }
    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.strip_prefix(' ').unwrap_or(rest).to_string());
    }
    // Comments (`: keep-alive`) and fields we do not use (`id:`, `retry:`).
    SseLine::Comment
}

/// An assembled SSE frame: the event name (if any) and joined data lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Default)]
struct FrameBuilder {
    event: Option<String>,
    data_lines: Vec<String>,
}

impl FrameBuilder {
    fn push(&mut self, line: SseLine) {
        match line {
            SseLine::Data(data) => self.data_lines.push(data),
            SseLine::Event(event) => self.event = Some(event),
            SseLine::Empty | SseLine::Comment => {}
        }
    }

    fn has_content(&self) -> bool {
        self.event.is_some() || !self.data_lines.is_empty()
    }

    fn take(&mut self) -> SseFrame {
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        frame
    }
}

/// Stream adapter that yields assembled [`SseFrame`]s from a byte stream.
///
/// Frame boundaries falling mid-event are handled by buffering: a frame is
/// only emitted once its terminating blank line (or end of stream) is seen.
pub struct SseFrameStream<S> {
    inner: S,
    buffer: String,
    builder: FrameBuilder,
    done: bool,
}

impl<S> SseFrameStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: String::new(),
            builder: FrameBuilder::default(),
            done: false,
        }
    }

    /// Pop one complete line from the buffer, handling `\r\n`.
    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.find('\n')?;
        let mut line = self.buffer[..end].to_string();
        self.buffer.drain(..=end);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

impl<S, E> Stream for SseFrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseFrame, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            // Drain complete lines already buffered.
            while let Some(line) = self.next_line() {
                match parse_line(&line) {
                    SseLine::Empty => {
                        if self.builder.has_content() {
                            return Poll::Ready(Some(Ok(self.builder.take())));
                        }
                    }
                    other => self.builder.push(other),
                }
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    match std::str::from_utf8(&bytes) {
                        Ok(text) => self.buffer.push_str(text),
                        Err(_) => {
                            // Non-UTF-8 chunks are dropped; the surrounding
                            // frame will fail JSON parsing and be reported there.
                            tracing::warn!("dropping non-utf8 sse chunk");
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    self.done = true;
                    // Flush a trailing line without newline, then a final frame.
                    if !self.buffer.is_empty() {
                        let line = std::mem::take(&mut self.buffer);
                        self.builder.push(parse_line(&line));
                    }
                    if self.builder.has_content() {
                        return Poll::Ready(Some(Ok(self.builder.take())));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
