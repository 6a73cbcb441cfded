//! Subscriber wire framing.
//!
//! Every delivered message is written as
//!
//! ```text
//! id:<messageId>|<channel>|<payloadLength>|<payload>\n
//! ```
//!
//! Channel names cannot contain `|`, and the explicit length lets the
//! payload carry any bytes, including `|` and newlines. The same encoding is
//! used for the chunked stream (frames back to back) and for WebSocket
//! subscribers (one binary message per frame).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::broker::Message;
use crate::utils::{RelayError, Result};

const PREFIX: &[u8] = b"id:";

/// Upper bound on the header (everything before the payload). Anything
/// longer without all separators present is garbage.
const MAX_HEADER_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u64,
    pub channel: String,
    pub payload: Bytes,
}

/// Encodes `message` as one frame.
pub fn encode(message: &Message) -> Bytes {
    encode_parts(message.id, &message.channel, &message.payload)
}

fn encode_parts(id: u64, channel: &str, payload: &[u8]) -> Bytes {
    let header = format!("id:{id}|{channel}|{}|", payload.len());
    let mut buf = BytesMut::with_capacity(header.len() + payload.len() + 1);
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Decodes exactly one frame, e.g. a WebSocket message.
pub fn decode(data: &[u8]) -> Result<Frame> {
    let mut decoder = FrameDecoder::new();
    decoder.extend(data);
    let frame = decoder
        .decode()?
        .ok_or_else(|| RelayError::MalformedFrame("truncated frame".to_string()))?;
    if decoder.buffered() != 0 {
        return Err(RelayError::MalformedFrame(
            "trailing bytes after frame".to_string(),
        ));
    }
    Ok(frame)
}

/// Incremental decoder for a stream of frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame, or `None` if more input is needed.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        let seen = self.buf.len().min(PREFIX.len());
        if self.buf[..seen] != PREFIX[..seen] {
            return Err(malformed("missing id: prefix"));
        }

        let Some(separators) = self.header_separators() else {
            if self.buf.len() > MAX_HEADER_LEN {
                return Err(malformed("header too long"));
            }
            return Ok(None);
        };
        let [id_end, channel_end, len_end] = separators;

        let id = parse_number(&self.buf[PREFIX.len()..id_end], "message id")?;
        let channel = std::str::from_utf8(&self.buf[id_end + 1..channel_end])
            .map_err(|_| malformed("channel is not utf-8"))?
            .to_string();
        let len = parse_number(&self.buf[channel_end + 1..len_end], "payload length")?;
        let len = usize::try_from(len).map_err(|_| malformed("payload length overflow"))?;

        let header_len = len_end + 1;
        let total = header_len
            .checked_add(len)
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| malformed("payload length overflow"))?;
        if self.buf.len() < total {
            return Ok(None);
        }
        if self.buf[total - 1] != b'\n' {
            return Err(malformed("missing frame terminator"));
        }

        self.buf.advance(header_len);
        let payload = self.buf.split_to(len).freeze();
        self.buf.advance(1);

        Ok(Some(Frame {
            id,
            channel,
            payload,
        }))
    }

    /// Positions of the three `|` that close the id, channel and length
    /// fields, if they have all arrived.
    fn header_separators(&self) -> Option<[usize; 3]> {
        let limit = self.buf.len().min(MAX_HEADER_LEN);
        let mut found = [0usize; 3];
        let mut count = 0;
        for (pos, byte) in self.buf[..limit].iter().enumerate().skip(PREFIX.len()) {
            if *byte == b'|' {
                found[count] = pos;
                count += 1;
                if count == found.len() {
                    return Some(found);
                }
            }
        }
        None
    }
}

fn parse_number(field: &[u8], what: &str) -> Result<u64> {
    std::str::from_utf8(field)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(&format!("invalid {what}")))
}

fn malformed(reason: &str) -> RelayError {
    RelayError::MalformedFrame(reason.to_string())
}
