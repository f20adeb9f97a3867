//! Framing and encoding of Stratum messages.
//!
//! Stratum is one JSON object per line. Two layers handle that here:
//!
//! - [`Message`] turns one line into a [`Request`] or [`Response`] and back.
//!   Decoding tolerates trailing CR, LF, and NUL bytes so that either peer's
//!   choice of terminator is accepted; encoding always ends in a single LF.
//! - [`LineCodec`] splits a byte stream into lines for
//!   [`FramedRead`](tokio_util::codec::FramedRead). A line that arrives over
//!   several reads stays buffered until its terminator shows up.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{StratumError, StratumResult};
use super::messages::{Request, Response};
use crate::tracing::prelude::*;

/// Default upper bound on a single line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

const TRAILING_JUNK: &[u8] = b"\r\n\0";

/// Strip trailing CR, LF, and NUL bytes.
pub fn trim_frame(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|b| !TRAILING_JUNK.contains(b))
        .map_or(0, |i| i + 1);
    &data[..end]
}

/// A message that travels as one JSON line.
pub trait Message: Serialize + DeserializeOwned {
    /// Decode one line, ignoring trailing CR, LF, and NUL bytes.
    fn decode(data: &[u8]) -> StratumResult<Self> {
        Ok(serde_json::from_slice(trim_frame(data))?)
    }

    /// Encode as one LF-terminated line.
    fn encode(&self) -> StratumResult<Bytes> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(Bytes::from(buf))
    }
}

impl Message for Request {}
impl Message for Response {}

/// Line splitter for Stratum connections.
///
/// Decodes to raw lines (without the LF); empty lines are skipped. Encodes
/// frames verbatim, since [`Message::encode`] already terminates them.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes at the front of the buffer already known not to contain LF
    next_index: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = BytesMut;
    type Error = StratumError;

    fn decode(&mut self, src: &mut BytesMut) -> StratumResult<Option<BytesMut>> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_length {
                    return Err(StratumError::LineTooLong(self.max_length));
                }
                if !src.is_empty() {
                    trace!(buffered = src.len(), "Partial line, waiting for more data");
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;
            if line_end > self.max_length {
                return Err(StratumError::LineTooLong(self.max_length));
            }

            let mut line = src.split_to(line_end + 1);
            line.truncate(line_end);

            if trim_frame(&line).is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> StratumResult<Option<BytesMut>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        let leftover = trim_frame(src).len();
        src.clear();
        self.next_index = 0;
        if leftover > 0 {
            return Err(StratumError::IncompleteLine(leftover));
        }
        Ok(None)
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = StratumError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> StratumResult<()> {
        dst.reserve(frame.len());
        dst.put(frame);
        Ok(())
    }
}
