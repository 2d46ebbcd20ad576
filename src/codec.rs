//! RFC 7252 §3 wire codec: byte slice → [`Message`] and back.
//!
//! Options are delta-encoded against the previous option number, with 4-bit
//! nibbles extended by one byte (nibble 13, value 13 + ext) or two
//! big-endian bytes (nibble 14, value 269 + ext); nibble 15 is reserved for
//! the payload marker and malformed anywhere else.

use std::error::Error;
use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::coap::{
    Code, Message, MsgType, COAP_VERSION, MAX_MESSAGE_SIZE, MAX_OPTION_VALUE_LENGTH,
    MAX_TOKEN_LENGTH, PAYLOAD_MARKER,
};

/// Codec failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Header fields out of range (version, type, token length) or a message
    /// that fails the encode pre-checks.
    Invalid,
    /// Truncated or structurally broken input bytes.
    Malformed,
    /// Option sequence violates order, count, width or length limits.
    Options,
    /// Output buffer cannot hold the encoded message.
    BufferTooSmall,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CodecError::Invalid => "invalid message fields",
            CodecError::Malformed => "malformed message",
            CodecError::Options => "bad option sequence",
            CodecError::BufferTooSmall => "output buffer too small",
        };
        write!(f, "coap codec error: {}", s)
    }
}

impl Error for CodecError {}

// Largest value representable by a nibble-14 extension.
const MAX_EXTENDED: u32 = 269 + u16::MAX as u32;

fn read_extended(buf: &[u8], offset: &mut usize, nibble: u8) -> Result<u32, CodecError> {
    match nibble {
        0..=12 => Ok(u32::from(nibble)),
        13 => {
            if *offset + 1 > buf.len() {
                return Err(CodecError::Malformed);
            }
            let ext = buf[*offset];
            *offset += 1;
            Ok(13 + u32::from(ext))
        }
        14 => {
            if *offset + 2 > buf.len() {
                return Err(CodecError::Malformed);
            }
            let ext = BigEndian::read_u16(&buf[*offset..*offset + 2]);
            *offset += 2;
            Ok(269 + u32::from(ext))
        }
        _ => Err(CodecError::Malformed),
    }
}

/// Decodes one datagram into a message.
pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::Malformed);
    }

    let b0 = buf[0];
    let version = (b0 >> 6) & 0x03;
    let mtype = (b0 >> 4) & 0x03;
    let tkl = usize::from(b0 & 0x0F);

    if version != COAP_VERSION {
        return Err(CodecError::Invalid);
    }
    if tkl > MAX_TOKEN_LENGTH {
        return Err(CodecError::Invalid);
    }

    let mut msg = Message::new();
    // the two type bits cover all four variants
    msg.mtype = MsgType::try_from(mtype).map_err(|_| CodecError::Invalid)?;
    msg.code = Code(buf[1]);
    msg.message_id = BigEndian::read_u16(&buf[2..4]);

    let mut offset = 4;
    if offset + tkl > buf.len() {
        return Err(CodecError::Malformed);
    }
    msg.token = buf[offset..offset + tkl].to_vec();
    offset += tkl;

    let mut last_number: u32 = 0;
    while offset < buf.len() {
        let byte = buf[offset];
        offset += 1;

        if byte == PAYLOAD_MARKER {
            let rest = &buf[offset..];
            // a marker with nothing behind it is forbidden on the wire
            if rest.is_empty() {
                return Err(CodecError::Malformed);
            }
            if rest.len() > MAX_MESSAGE_SIZE {
                return Err(CodecError::Malformed);
            }
            msg.payload = rest.to_vec();
            return Ok(msg);
        }

        let delta_nibble = (byte >> 4) & 0x0F;
        let len_nibble = byte & 0x0F;
        if delta_nibble == 15 || len_nibble == 15 {
            return Err(CodecError::Malformed);
        }

        let delta = read_extended(buf, &mut offset, delta_nibble)?;
        let length = read_extended(buf, &mut offset, len_nibble)? as usize;

        if length > MAX_OPTION_VALUE_LENGTH {
            return Err(CodecError::Options);
        }

        let number = last_number + delta;
        if number > u32::from(u16::MAX) {
            return Err(CodecError::Options);
        }

        if offset + length > buf.len() {
            return Err(CodecError::Malformed);
        }
        msg.add_option(number as u16, &buf[offset..offset + length])?;
        offset += length;
        last_number = number;
    }

    Ok(msg)
}

fn write_extended(
    value: u32,
    out: &mut [u8],
    offset: &mut usize,
) -> Result<u8, CodecError> {
    if value <= 12 {
        Ok(value as u8)
    } else if value <= 13 + 255 {
        if *offset + 1 > out.len() {
            return Err(CodecError::BufferTooSmall);
        }
        out[*offset] = (value - 13) as u8;
        *offset += 1;
        Ok(13)
    } else if value <= MAX_EXTENDED {
        if *offset + 2 > out.len() {
            return Err(CodecError::BufferTooSmall);
        }
        BigEndian::write_u16(&mut out[*offset..*offset + 2], (value - 269) as u16);
        *offset += 2;
        Ok(14)
    } else {
        Err(CodecError::Options)
    }
}

fn can_encode(msg: &Message) -> bool {
    if msg.version != COAP_VERSION {
        return false;
    }
    if msg.token.len() > MAX_TOKEN_LENGTH {
        return false;
    }
    msg.options()
        .iter()
        .all(|opt| opt.value.len() <= MAX_OPTION_VALUE_LENGTH)
}

/// Encodes a message into `out`, returning the number of bytes written.
///
/// A message with an empty payload is written without the 0xFF marker.
pub fn encode(msg: &Message, out: &mut [u8]) -> Result<usize, CodecError> {
    if !can_encode(msg) {
        return Err(CodecError::Invalid);
    }
    if out.len() < 4 {
        return Err(CodecError::BufferTooSmall);
    }

    out[0] = (COAP_VERSION << 6) | ((msg.mtype as u8) << 4) | (msg.token.len() as u8);
    out[1] = msg.code.0;
    BigEndian::write_u16(&mut out[2..4], msg.message_id);
    let mut offset = 4;

    if offset + msg.token.len() > out.len() {
        return Err(CodecError::BufferTooSmall);
    }
    out[offset..offset + msg.token.len()].copy_from_slice(&msg.token);
    offset += msg.token.len();

    let mut last_number: u32 = 0;
    for opt in msg.options() {
        let delta = u32::from(opt.number) - last_number;

        if offset + 1 > out.len() {
            return Err(CodecError::BufferTooSmall);
        }
        let header_at = offset;
        offset += 1;

        let delta_nibble = write_extended(delta, out, &mut offset)?;
        let len_nibble = write_extended(opt.value.len() as u32, out, &mut offset)?;
        out[header_at] = (delta_nibble << 4) | (len_nibble & 0x0F);

        if offset + opt.value.len() > out.len() {
            return Err(CodecError::BufferTooSmall);
        }
        out[offset..offset + opt.value.len()].copy_from_slice(&opt.value);
        offset += opt.value.len();
        last_number = u32::from(opt.number);
    }

    if !msg.payload.is_empty() {
        if offset + 1 + msg.payload.len() > out.len() {
            return Err(CodecError::BufferTooSmall);
        }
        out[offset] = PAYLOAD_MARKER;
        offset += 1;
        out[offset..offset + msg.payload.len()].copy_from_slice(&msg.payload);
        offset += msg.payload.len();
    }

    Ok(offset)
}
