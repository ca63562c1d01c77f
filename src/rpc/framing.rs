//! Newline-delimited framing.
//!
//! [`LineBuffer`] turns arbitrary byte chunks into complete lines, keeping a
//! partial line buffered until its terminator arrives. [`FrameReader`] drives
//! a `LineBuffer` from any [`AsyncRead`].

use crate::rpc::message::ParseError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound for a single line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// One unit produced by the framing layer.
#[derive(Debug)]
pub enum Frame {
    /// A complete, trimmed, non-empty line.
    Line(String),
    /// A line that could not be decoded; the stream continues after it.
    Invalid(ParseError),
}

#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    max_line_bytes: usize,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_limit(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_line_bytes,
            discarding: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes of the incomplete trailing line.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, or `None` until more bytes are pushed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let found = self.buf[self.scanned..].iter().position(|&b| b == b'\n');
            let Some(pos) = found.map(|offset| self.scanned + offset) else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_line_bytes {
                    self.buf.clear();
                    self.scanned = 0;
                    if !self.discarding {
                        self.discarding = true;
                        return Some(Frame::Invalid(ParseError::TooLong {
                            limit: self.max_line_bytes,
                        }));
                    }
                }
                return None;
            };

            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                // tail of a line already reported as too long
                continue;
            }
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(frame) = self.decode(line) {
                return Some(frame);
            }
        }
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(&mut self) -> Option<Frame> {
        let line = std::mem::take(&mut self.buf);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        self.decode(line)
    }

    fn decode(&self, line: Vec<u8>) -> Option<Frame> {
        if line.len() > self.max_line_bytes {
            return Some(Frame::Invalid(ParseError::TooLong {
                limit: self.max_line_bytes,
            }));
        }
        match String::from_utf8(line) {
            Ok(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(Frame::Line(trimmed.to_string()))
                }
            }
            Err(_) => Some(Frame::Invalid(ParseError::Utf8)),
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads frames from an async byte stream.
///
/// `next_frame` is cancel-safe: dropping its future never loses buffered
/// bytes, so it can be raced against an idle timer.
pub struct FrameReader<R> {
    reader: R,
    buffer: LineBuffer,
    chunk: Box<[u8]>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            buffer: LineBuffer::with_limit(max_line_bytes),
            chunk: vec![0u8; READ_CHUNK_BYTES].into_boxed_slice(),
            eof: false,
        }
    }

    /// Next frame, or `Ok(None)` at end of stream.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.buffer.next_frame() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(self.buffer.finish());
            }
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.push(&self.chunk[..n]);
            }
        }
    }
}
