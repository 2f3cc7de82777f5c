//! Wire framing for NETCONF messages (RFC 6242).
//!
//! A session speaks exactly one of two mutually exclusive framing modes,
//! selected once from the capability intersection during the hello exchange
//! and never changed mid-stream:
//!
//! - [`FramingMode::EndMarker`] (`:base:1.0`): each message is terminated by
//!   the literal six-character sentinel `]]>]]>`.
//! - [`FramingMode::Chunked`] (`:base:1.1`): each message is split into
//!   length-prefixed chunks (`\n#<len>\n`) terminated by `\n##\n`.
//!
//! Decoders follow a push model: feed raw socket bytes in with `push()`,
//! get back zero or more complete messages. Partial data is buffered
//! internally until the next push.

mod chunked;
pub(crate) mod end_marker;

pub use chunked::ChunkedDecoder;
pub use end_marker::EndMarkerDecoder;

use bytes::Bytes;

use crate::error::Result;

/// The `:base:1.0` end-of-message sentinel.
pub const END_MARKER: &[u8] = b"]]>]]>";

/// Default maximum size of a single decoded message (32 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Default chunk size used when encoding in chunked mode.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Maximum chunk length permitted by RFC 6242 section 4.2.
pub const MAX_CHUNK_LENGTH: u64 = 4_294_967_295;

/// Wire framing scheme negotiated for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// `]]>]]>` delimited messages (`:base:1.0`).
    EndMarker,
    /// Length-prefixed chunks (`:base:1.1`).
    Chunked,
}

/// Encodes complete messages into delimited wire bytes for one session.
#[derive(Debug, Clone)]
pub struct MessageEncoder {
    mode: FramingMode,
    chunk_size: usize,
}

impl MessageEncoder {
    pub fn new(mode: FramingMode, chunk_size: usize) -> Self {
        Self {
            mode,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Frame one complete message for the wire.
    ///
    /// In end-marker mode this fails if the message contains the sentinel
    /// sequence, since it could not be recovered on the far side.
    pub fn encode(&self, message: &[u8]) -> Result<Bytes> {
        match self.mode {
            FramingMode::EndMarker => end_marker::encode(message),
            FramingMode::Chunked => Ok(chunked::encode(message, self.chunk_size)),
        }
    }
}

/// Decoder for whichever framing mode the session negotiated.
#[derive(Debug)]
pub enum MessageDecoder {
    EndMarker(EndMarkerDecoder),
    Chunked(ChunkedDecoder),
}

impl MessageDecoder {
    pub fn new(mode: FramingMode, max_message_size: usize) -> Self {
        match mode {
            FramingMode::EndMarker => {
                MessageDecoder::EndMarker(EndMarkerDecoder::new(max_message_size))
            }
            FramingMode::Chunked => MessageDecoder::Chunked(ChunkedDecoder::new(max_message_size)),
        }
    }

    /// Push raw stream bytes and extract all complete messages.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        match self {
            MessageDecoder::EndMarker(d) => d.push(data),
            MessageDecoder::Chunked(d) => d.push(data),
        }
    }

    /// Check for a cleanly delimited stream end.
    ///
    /// Call after EOF; an in-progress message at that point means the peer
    /// truncated the stream, which is fatal.
    pub fn finish(&self) -> Result<()> {
        match self {
            MessageDecoder::EndMarker(d) => d.finish(),
            MessageDecoder::Chunked(d) => d.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_round_trip_both_modes() {
        for mode in [FramingMode::EndMarker, FramingMode::Chunked] {
            let enc = MessageEncoder::new(mode, 8);
            let framed = enc.encode(b"<rpc/>").unwrap();

            let mut dec = MessageDecoder::new(mode, DEFAULT_MAX_MESSAGE_SIZE);
            let messages = dec.push(&framed).unwrap();
            assert_eq!(messages.len(), 1, "mode {:?}", mode);
            assert_eq!(&messages[0][..], b"<rpc/>");
            dec.finish().unwrap();
        }
    }

    #[test]
    fn test_mode_is_immutable() {
        let enc = MessageEncoder::new(FramingMode::Chunked, 16);
        assert_eq!(enc.mode(), FramingMode::Chunked);
        let enc = enc.clone();
        assert_eq!(enc.mode(), FramingMode::Chunked);
    }
}
