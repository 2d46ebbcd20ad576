//! Wire codec tests: round-trips, byte-exact re-encoding and the reject
//! paths for malformed input.

use teleserver::coap::{Code, Message, MsgType, OptionNumber, MAX_MESSAGE_SIZE};
use teleserver::codec::{decode, encode, CodecError};

fn build_basic_message() -> Message {
    let mut msg = Message::new();
    msg.mtype = MsgType::Confirmable;
    msg.code = Code::GET;
    msg.message_id = 0x1234;
    msg.token = vec![0xDE, 0xAD];
    msg.add_option(OptionNumber::UriPath, b"sensor").unwrap();
    msg.add_option(OptionNumber::UriPath, b"temp").unwrap();
    msg.add_option(OptionNumber::Accept, &[50]).unwrap();
    msg.payload = b"42".to_vec();
    msg
}

fn encode_to_vec(msg: &Message) -> Vec<u8> {
    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    let n = encode(msg, &mut buf).expect("encode failed");
    buf[..n].to_vec()
}

#[test]
fn test_round_trip_basic() {
    let msg = build_basic_message();
    let wire = encode_to_vec(&msg);
    let decoded = decode(&wire).expect("decode failed");
    assert_eq!(msg, decoded);
}

#[test]
fn test_round_trip_no_token_no_payload() {
    let mut msg = Message::new();
    msg.code = Code::GET;
    msg.message_id = 7;
    let wire = encode_to_vec(&msg);
    assert_eq!(wire.len(), 4);
    assert_eq!(decode(&wire).unwrap(), msg);
}

#[test]
fn test_extension_13_delta() {
    // If-Match (1) then Max-Age (14): the second delta is 13, which takes
    // the one-byte extension form
    let mut msg = Message::new();
    msg.code = Code::GET;
    msg.add_option(OptionNumber::IfMatch, &[0xAA]).unwrap();
    msg.add_option(OptionNumber::MaxAge, &[0x00]).unwrap();

    let wire = encode_to_vec(&msg);
    // option 1: header 0x11 + 1 value byte; option 2: 0xD1, ext 0x00, value
    assert_eq!(&wire[4..], &[0x11, 0xAA, 0xD1, 0x00, 0x00]);
    assert_eq!(decode(&wire).unwrap(), msg);
}

#[test]
fn test_extension_14_length() {
    // a 270-byte Uri-Query needs the two-byte length extension
    let big: Vec<u8> = (0..270).map(|i| b'a' + (i % 26) as u8).collect();
    let mut msg = Message::new();
    msg.code = Code::GET;
    msg.add_option(OptionNumber::UriQuery, &big).unwrap();

    let wire = encode_to_vec(&msg);
    // delta 15 => nibble 13 ext 2; length 270 => nibble 14 ext 1
    assert_eq!(&wire[4..8], &[0xDE, 0x02, 0x00, 0x01]);
    assert_eq!(decode(&wire).unwrap(), msg);
}

#[test]
fn test_byte_exact_reencode() {
    // hand-written datagram with minimal-width extensions and sorted options
    let wire = [
        0x41, 0x01, 0x12, 0x34, // ver 1, CON, tkl 1, GET, mid 0x1234
        0xA1, // token
        0xB5, b'h', b'e', b'l', b'l', b'o', // Uri-Path "hello"
        0xFF, b'a', b'b', b'c', // payload
    ];
    let msg = decode(&wire).unwrap();
    assert_eq!(encode_to_vec(&msg), wire);
}

#[test]
fn test_decode_short_datagram() {
    assert_eq!(decode(&[0x41, 0x01, 0x12]), Err(CodecError::Malformed));
}

#[test]
fn test_decode_invalid_version() {
    assert_eq!(
        decode(&[0x81, 0x01, 0x12, 0x34]),
        Err(CodecError::Invalid)
    );
}

#[test]
fn test_decode_invalid_tkl() {
    // tkl 9 is reserved
    assert_eq!(
        decode(&[0x49, 0x01, 0x12, 0x34]),
        Err(CodecError::Invalid)
    );
}

#[test]
fn test_decode_truncated_token() {
    assert_eq!(
        decode(&[0x42, 0x01, 0x12, 0x34, 0xDE]),
        Err(CodecError::Malformed)
    );
}

#[test]
fn test_decode_delta_nibble_15() {
    assert_eq!(
        decode(&[0x40, 0x01, 0x00, 0x01, 0xF0]),
        Err(CodecError::Malformed)
    );
}

#[test]
fn test_decode_length_nibble_15() {
    assert_eq!(
        decode(&[0x40, 0x01, 0x00, 0x01, 0x0F]),
        Err(CodecError::Malformed)
    );
}

#[test]
fn test_decode_length_over_270() {
    // length nibble 14 with extension 2 declares 271 bytes
    assert_eq!(
        decode(&[0x40, 0x01, 0x00, 0x01, 0x0E, 0x00, 0x02]),
        Err(CodecError::Options)
    );
}

#[test]
fn test_decode_truncated_option_value() {
    // header declares 5 value bytes, only 2 present
    assert_eq!(
        decode(&[0x40, 0x01, 0x00, 0x01, 0xB5, b'h', b'i']),
        Err(CodecError::Malformed)
    );
}

#[test]
fn test_decode_too_many_options() {
    let mut wire = vec![0x40, 0x01, 0x00, 0x01];
    // 17 empty options with delta 1 each
    wire.extend(std::iter::repeat(0x10).take(17));
    assert_eq!(decode(&wire), Err(CodecError::Options));
}

#[test]
fn test_decode_bare_payload_marker() {
    // 0xFF must be followed by at least one payload byte
    assert_eq!(
        decode(&[0x40, 0x01, 0x00, 0x01, 0xFF]),
        Err(CodecError::Malformed)
    );
}

#[test]
fn test_encode_no_marker_when_payload_empty() {
    let mut msg = Message::new();
    msg.code = Code::GET;
    msg.add_option(OptionNumber::UriPath, b"hi").unwrap();
    let wire = encode_to_vec(&msg);
    assert!(!wire.contains(&0xFF));
}

#[test]
fn test_encode_small_buffer() {
    let mut msg = Message::new();
    msg.code = Code::GET;
    let mut buf = [0u8; 3];
    assert_eq!(encode(&msg, &mut buf), Err(CodecError::BufferTooSmall));
}

#[test]
fn test_encode_exact_buffer() {
    let mut msg = Message::new();
    msg.code = Code::GET;
    msg.token = vec![0x01];
    msg.payload = b"xy".to_vec();
    // 4 header + 1 token + 1 marker + 2 payload
    let mut buf = [0u8; 8];
    assert_eq!(encode(&msg, &mut buf), Ok(8));
    let mut small = [0u8; 7];
    assert_eq!(encode(&msg, &mut small), Err(CodecError::BufferTooSmall));
}

#[test]
fn test_encode_rejects_bad_version() {
    let mut msg = Message::new();
    msg.code = Code::GET;
    msg.version = 2;
    let mut buf = [0u8; 16];
    assert_eq!(encode(&msg, &mut buf), Err(CodecError::Invalid));
}

#[test]
fn test_encode_rejects_long_token() {
    let mut msg = Message::new();
    msg.code = Code::GET;
    msg.token = vec![0u8; 9];
    let mut buf = [0u8; 16];
    assert_eq!(encode(&msg, &mut buf), Err(CodecError::Invalid));
}
