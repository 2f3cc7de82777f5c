//! `:base:1.0` end-marker framing.
//!
//! A message is everything up to the first occurrence of the six-character
//! sentinel `]]>]]>`. The sentinel may straddle socket reads, so the decoder
//! accumulates into a `BytesMut` and rescans on every push.

use bytes::{Bytes, BytesMut};

use super::END_MARKER;
use crate::error::{NetconfError, Result};

/// Frame one message by appending the end-of-message sentinel.
///
/// Fails if the message itself contains the sentinel: the receiver would
/// split the message at that point and both halves would be garbage.
pub fn encode(message: &[u8]) -> Result<Bytes> {
    if find_subslice(message, END_MARKER).is_some() {
        return Err(NetconfError::Framing(
            "message contains the ]]>]]> end-of-message sentinel".to_string(),
        ));
    }
    let mut buf = BytesMut::with_capacity(message.len() + END_MARKER.len());
    buf.extend_from_slice(message);
    buf.extend_from_slice(END_MARKER);
    Ok(buf.freeze())
}

/// Decoder for end-marker framed streams.
#[derive(Debug)]
pub struct EndMarkerDecoder {
    buffer: BytesMut,
    /// Buffer offset already known to be sentinel-free, so rescans do not
    /// start from zero on every push.
    scanned: usize,
    max_message_size: usize,
}

impl EndMarkerDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            scanned: 0,
            max_message_size,
        }
    }

    /// Push stream bytes and extract all complete messages.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        loop {
            // The sentinel may begin up to 5 bytes before the new data.
            let from = self.scanned.saturating_sub(END_MARKER.len() - 1);
            match find_subslice(&self.buffer[from..], END_MARKER) {
                Some(pos) => {
                    let end = from + pos;
                    let message = self.buffer.split_to(end).freeze();
                    let _ = self.buffer.split_to(END_MARKER.len());
                    self.scanned = 0;
                    messages.push(message);
                }
                None => {
                    self.scanned = self.buffer.len();
                    break;
                }
            }
        }

        if self.buffer.len() > self.max_message_size {
            return Err(NetconfError::Framing(format!(
                "message exceeds maximum size {} without end marker",
                self.max_message_size
            )));
        }

        Ok(messages)
    }

    /// Verify the stream ended on a message boundary.
    pub fn finish(&self) -> Result<()> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(NetconfError::Framing(format!(
                "stream ended with {} unterminated bytes",
                self.buffer.len()
            )))
        }
    }

    /// Consume the decoder, returning any bytes buffered past the last
    /// complete message. Used after the hello exchange to hand residual
    /// bytes to the decoder for the negotiated framing mode.
    pub fn into_remaining(self) -> Bytes {
        self.buffer.freeze()
    }
}

pub(super) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
