//! Server-sent-events framing
//!
//! The event endpoints answer with a `text/event-stream` body made of frames
//! separated by blank lines:
//!
//! ```text
//! :ok
//!
//! event: temp
//! data: {"data":"21.5","ttl":60,"published_at":"2024-01-01T00:00:00.000Z","coreid":"core1"}
//!
//! ```
//!
//! [`SseDecoder`] turns arbitrary byte chunks into [`RawFrame`]s; it knows
//! nothing about what the frame data means.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::TransportError;
use crate::FrameStream;

/// One frame of a server-sent-events stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFrame {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`
    pub data: String,
}

impl RawFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

/// Default bound on an unterminated line and on the data of one frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Incremental decoder from bytes to frames
#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
    data_len: usize,
    max_frame_size: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            max_frame_size,
        }
    }

    /// Feed a chunk and return every frame it completed
    ///
    /// Fails once a line or a frame's data outgrows the size limit; the
    /// decoder should not be fed again after that.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>, TransportError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(newline + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            // Invalid UTF-8 lines are dropped, the frame boundary logic still holds
            let Ok(line) = std::str::from_utf8(&line) else {
                tracing::debug!("Skipping non UTF-8 line in event stream");
                continue;
            };

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
            } else {
                self.process_line(line);
                if self.data_len > self.max_frame_size {
                    return Err(self.oversized("frame data"));
                }
            }
        }

        if self.buffer.len() > self.max_frame_size {
            return Err(self.oversized("line"));
        }
        Ok(frames)
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Option<RawFrame> {
        if !self.buffer.is_empty() {
            let rest = self.buffer.split();
            if let Ok(line) = std::str::from_utf8(&rest) {
                let line = line.trim_end_matches(['\r', '\n']);
                if !line.is_empty() {
                    self.process_line(line);
                }
            }
        }
        self.take_frame()
    }

    fn process_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len() + 1;
                self.data.push(value.to_string());
            }
            // id / retry are not used by the event endpoints
            _ => {}
        }
    }

    fn take_frame(&mut self) -> Option<RawFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let frame = RawFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        self.data_len = 0;
        Some(frame)
    }

    fn oversized(&mut self, what: &str) -> TransportError {
        self.buffer.clear();
        self.event = None;
        self.data.clear();
        self.data_len = 0;
        TransportError::Stream(format!(
            "event stream {what} exceeds {} bytes",
            self.max_frame_size
        ))
    }
}

/// Adapt a chunked byte stream into a [`FrameStream`]
///
/// The returned stream ends when the body ends; a body error is yielded once
/// as [`TransportError::Stream`] and then the stream ends.
pub fn decode_frames<S, E>(byte_stream: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(byte_stream), SseDecoder::new(), VecDeque::new(), false);

    futures::stream::unfold(state, |(mut stream, mut decoder, mut pending, mut done)| async move {
        loop {
            if let Some(frame) = pending.pop_front() {
                return Some((Ok(frame), (stream, decoder, pending, done)));
            }
            if done {
                return None;
            }

            match stream.next().await {
                Some(Ok(chunk)) => match decoder.push(&chunk) {
                    Ok(frames) => pending.extend(frames),
                    Err(error) => {
                        done = true;
                        return Some((Err(error), (stream, decoder, pending, done)));
                    }
                },
                Some(Err(e)) => {
                    done = true;
                    let error = TransportError::Stream(e.to_string());
                    return Some((Err(error), (stream, decoder, pending, done)));
                }
                None => {
                    done = true;
                    pending.extend(decoder.finish());
                }
            }
        }
    })
    .boxed()
}
