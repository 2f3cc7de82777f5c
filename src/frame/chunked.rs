//! `:base:1.1` chunked framing (RFC 6242 section 4.2).
//!
//! Wire layout of one message:
//!
//! ```text
//! \n#<chunk-size>\n<chunk-data> ... \n##\n
//! ```
//!
//! A message may be split into any number of chunks; the decoder reassembles
//! them all before yielding the message. Malformed length headers and missing
//! terminators are fatal framing errors.

use bytes::{Bytes, BytesMut};

use super::MAX_CHUNK_LENGTH;
use crate::error::{NetconfError, Result};

/// Longest possible chunk header: `\n#` + 10 digits + `\n`.
const MAX_HEADER_LEN: usize = 13;

/// Frame one message, splitting the payload at `chunk_size` boundaries.
pub fn encode(message: &[u8], chunk_size: usize) -> Bytes {
    let chunk_size = chunk_size.max(1);
    let mut buf = BytesMut::with_capacity(message.len() + 32);
    for chunk in message.chunks(chunk_size) {
        buf.extend_from_slice(format!("\n#{}\n", chunk.len()).as_bytes());
        buf.extend_from_slice(chunk);
    }
    buf.extend_from_slice(b"\n##\n");
    buf.freeze()
}

#[derive(Debug)]
enum State {
    /// Waiting for a `\n#<len>\n` chunk header or the `\n##\n` terminator.
    Header,
    /// Inside a chunk with this many payload bytes still owed.
    Data { remaining: usize },
}

/// Decoder for chunked framed streams.
#[derive(Debug)]
pub struct ChunkedDecoder {
    buffer: BytesMut,
    state: State,
    /// Chunks of the in-progress message, reassembled in order.
    message: BytesMut,
    /// Whether the in-progress message has received at least one chunk.
    started: bool,
    max_message_size: usize,
}

impl ChunkedDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::Header,
            message: BytesMut::new(),
            started: false,
            max_message_size,
        }
    }

    /// Push stream bytes and extract all complete messages.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut messages = Vec::new();
        while let Some(message) = self.advance()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Drive the state machine one step.
    ///
    /// Returns `Ok(Some(message))` when a full message was reassembled,
    /// `Ok(None)` when more bytes are needed.
    fn advance(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::Header => match self.parse_header()? {
                    HeaderToken::NeedMore => return Ok(None),
                    HeaderToken::Chunk(len) => {
                        self.started = true;
                        self.state = State::Data { remaining: len };
                    }
                    HeaderToken::EndOfMessage => {
                        self.started = false;
                        let message = self.message.split().freeze();
                        return Ok(Some(message));
                    }
                },
                State::Data { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let take = remaining.min(self.buffer.len());
                    self.message.extend_from_slice(&self.buffer.split_to(take));
                    if self.message.len() > self.max_message_size {
                        return Err(NetconfError::Framing(format!(
                            "chunked message exceeds maximum size {}",
                            self.max_message_size
                        )));
                    }
                    if take == remaining {
                        self.state = State::Header;
                    } else {
                        self.state = State::Data {
                            remaining: remaining - take,
                        };
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn parse_header(&mut self) -> Result<HeaderToken> {
        let buf = &self.buffer[..];
        if buf.len() < 3 {
            return Ok(HeaderToken::NeedMore);
        }
        if buf[0] != b'\n' || buf[1] != b'#' {
            return Err(NetconfError::Framing(format!(
                "invalid chunk header: expected \\n# but found {:02x}{:02x}",
                buf[0], buf[1]
            )));
        }

        // End-of-chunks: \n##\n
        if buf[2] == b'#' {
            if buf.len() < 4 {
                return Ok(HeaderToken::NeedMore);
            }
            if buf[3] != b'\n' {
                return Err(NetconfError::Framing(
                    "invalid end-of-chunks marker".to_string(),
                ));
            }
            let _ = self.buffer.split_to(4);
            return Ok(HeaderToken::EndOfMessage);
        }

        // Chunk length: \n#<digits>\n, 1..=4294967295 with no leading zero.
        let Some(newline) = buf[2..].iter().position(|&b| b == b'\n') else {
            if buf.len() > MAX_HEADER_LEN {
                return Err(NetconfError::Framing(
                    "chunk length header missing terminating newline".to_string(),
                ));
            }
            return Ok(HeaderToken::NeedMore);
        };
        let digits = &buf[2..2 + newline];
        if digits.is_empty()
            || digits[0] == b'0'
            || !digits.iter().all(|b| b.is_ascii_digit())
            || digits.len() > 10
        {
            return Err(NetconfError::Framing(format!(
                "malformed chunk length {:?}",
                String::from_utf8_lossy(digits)
            )));
        }
        let len: u64 = String::from_utf8_lossy(digits)
            .parse()
            .map_err(|_| NetconfError::Framing("malformed chunk length".to_string()))?;
        if len > MAX_CHUNK_LENGTH {
            return Err(NetconfError::Framing(format!(
                "chunk length {} exceeds protocol maximum",
                len
            )));
        }
        let _ = self.buffer.split_to(2 + newline + 1);
        Ok(HeaderToken::Chunk(len as usize))
    }

    /// Verify the stream ended on a message boundary.
    pub fn finish(&self) -> Result<()> {
        let mid_message = self.started
            || !self.message.is_empty()
            || !self.buffer.is_empty()
            || matches!(self.state, State::Data { .. });
        if mid_message {
            Err(NetconfError::Framing(
                "stream ended mid-message without end-of-chunks marker".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

enum HeaderToken {
    NeedMore,
    Chunk(usize),
    EndOfMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DEFAULT_MAX_MESSAGE_SIZE;

    fn decoder() -> ChunkedDecoder {
        ChunkedDecoder::new(DEFAULT_MAX_MESSAGE_SIZE)
    }

    fn round_trip(payload: &[u8], chunk_size: usize) {
        let framed = encode(payload, chunk_size);
        let mut dec = decoder();
        let messages = dec.push(&framed).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], payload);
        dec.finish().unwrap();
    }

    #[test]
    fn test_round_trip_single_chunk() {
        round_trip(b"<rpc message-id=\"1\"><get-config/></rpc>", 4096);
    }

    #[test]
    fn test_round_trip_at_chunk_boundaries() {
        let chunk = 16;
        // Exact multiple, one less, one more.
        for len in [chunk * 4, chunk * 4 - 1, chunk * 4 + 1] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            round_trip(&payload, chunk);
        }
    }

    #[test]
    fn test_wire_layout() {
        let framed = encode(b"hello", 4096);
        assert_eq!(&framed[..], b"\n#5\nhello\n##\n");
    }

    #[test]
    fn test_multi_chunk_wire_layout() {
        let framed = encode(b"abcdef", 4);
        assert_eq!(&framed[..], b"\n#4\nabcd\n#2\nef\n##\n");
    }

    #[test]
    fn test_byte_at_a_time() {
        let payload = b"<rpc-reply><ok/></rpc-reply>";
        let framed = encode(payload, 7);
        let mut dec = decoder();
        let mut all = Vec::new();
        for b in framed.iter() {
            all.extend(dec.push(&[*b]).unwrap());
        }
        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], payload);
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let mut data = encode(b"<a/>", 64).to_vec();
        data.extend_from_slice(&encode(b"<b/>", 64));
        let mut dec = decoder();
        let messages = dec.push(&data).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0][..], b"<a/>");
        assert_eq!(&messages[1][..], b"<b/>");
    }

    #[test]
    fn test_malformed_header_prefix() {
        let mut dec = decoder();
        let result = dec.push(b"garbage");
        assert!(matches!(result, Err(NetconfError::Framing(_))));
    }

    #[test]
    fn test_leading_zero_length_rejected() {
        let mut dec = decoder();
        let result = dec.push(b"\n#05\nhello\n##\n");
        assert!(matches!(result, Err(NetconfError::Framing(_))));
    }

    #[test]
    fn test_unterminated_length_rejected() {
        let mut dec = decoder();
        let result = dec.push(b"\n#123456789012345");
        assert!(matches!(result, Err(NetconfError::Framing(_))));
    }

    #[test]
    fn test_missing_terminator_is_fatal_at_eof() {
        let mut dec = decoder();
        dec.push(b"\n#5\nhello").unwrap();
        assert!(matches!(dec.finish(), Err(NetconfError::Framing(_))));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut dec = ChunkedDecoder::new(8);
        let framed = encode(b"way too large for the limit", 8);
        let result = dec.push(&framed);
        assert!(matches!(result, Err(NetconfError::Framing(_))));
    }

    #[test]
    fn test_bad_end_marker_rejected() {
        let mut dec = decoder();
        let result = dec.push(b"\n#2\nhi\n##X");
        assert!(matches!(result, Err(NetconfError::Framing(_))));
    }
}
