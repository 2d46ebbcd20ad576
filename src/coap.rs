//! CoAP message model: protocol constants, codes, options and the message
//! entity shared by the codec, dispatcher and handlers.
//!
//! See <https://datatracker.ietf.org/doc/html/rfc7252> for the protocol
//! description. Only the subset this server speaks is modeled: piggybacked
//! ACK / NON exchanges, ≤16 options per message, no block-wise transfer.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::codec::CodecError;

/// Protocol version; the only value RFC 7252 defines.
pub const COAP_VERSION: u8 = 1;
/// IANA-assigned default UDP port.
pub const DEFAULT_PORT: u16 = 5683;
/// Upper bound on token length (TKL field is 4 bits but 9..15 are reserved).
pub const MAX_TOKEN_LENGTH: usize = 8;
/// Largest option value this profile accepts (nibble 14 covers 269 + u16,
/// but everything the server speaks fits well under this cap).
pub const MAX_OPTION_VALUE_LENGTH: usize = 270;
/// Options per message in this profile.
pub const MAX_OPTIONS: usize = 16;
/// Whole-datagram cap: typical MTU minus IP/UDP headers.
pub const MAX_MESSAGE_SIZE: usize = 1472;
/// Byte separating options from payload on the wire.
pub const PAYLOAD_MARKER: u8 = 0xFF;
/// Cap on the reassembled Uri-Path string.
pub const MAX_PATH_LENGTH: usize = 128;

/// Message type from the fixed header (2 bits).
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgment = 2,
    Reset = 3,
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MsgType::Confirmable => "CON",
            MsgType::NonConfirmable => "NON",
            MsgType::Acknowledgment => "ACK",
            MsgType::Reset => "RST",
        };
        write!(f, "{}", s)
    }
}

/// Code byte: class in bits 7..5, detail in bits 4..0.
///
/// Kept as an open newtype rather than an enum because any byte can arrive
/// on the wire; the named constants cover what this server emits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0);

    // requests (0.xx)
    pub const GET: Code = Code(1);
    pub const POST: Code = Code(2);
    pub const PUT: Code = Code(3);
    pub const DELETE: Code = Code(4);

    // success (2.xx)
    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);

    // client errors (4.xx)
    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const UNAUTHORIZED: Code = Code::new(4, 1);
    pub const BAD_OPTION: Code = Code::new(4, 2);
    pub const FORBIDDEN: Code = Code::new(4, 3);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
    pub const NOT_ACCEPTABLE: Code = Code::new(4, 6);

    // server errors (5.xx)
    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
    pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);
    pub const BAD_GATEWAY: Code = Code::new(5, 2);
    pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);
    pub const GATEWAY_TIMEOUT: Code = Code::new(5, 4);
    pub const PROXYING_NOT_SUPPORTED: Code = Code::new(5, 5);

    pub const fn new(class: u8, detail: u8) -> Code {
        Code(((class & 0x07) << 5) | (detail & 0x1F))
    }

    pub const fn class(self) -> u8 {
        (self.0 >> 5) & 0x07
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1F
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Code::GET => "GET",
            Code::POST => "POST",
            Code::PUT => "PUT",
            Code::DELETE => "DELETE",
            Code::CREATED => "2.01 Created",
            Code::DELETED => "2.02 Deleted",
            Code::VALID => "2.03 Valid",
            Code::CHANGED => "2.04 Changed",
            Code::CONTENT => "2.05 Content",
            Code::BAD_REQUEST => "4.00 Bad Request",
            Code::UNAUTHORIZED => "4.01 Unauthorized",
            Code::NOT_FOUND => "4.04 Not Found",
            Code::METHOD_NOT_ALLOWED => "4.05 Method Not Allowed",
            Code::INTERNAL_SERVER_ERROR => "5.00 Internal Server Error",
            Code::NOT_IMPLEMENTED => "5.01 Not Implemented",
            _ => return write!(f, "{}.{:02}", self.class(), self.detail()),
        };
        write!(f, "{}", name)
    }
}

/// Request method, derived from a class-0 code with detail 1..4.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    Get = 1,
    Post = 2,
    Put = 3,
    Delete = 4,
}

impl Method {
    /// Maps a request code to its method; `None` for non-method codes.
    pub fn from_code(code: Code) -> Option<Method> {
        if code.class() != 0 {
            return None;
        }
        Method::try_from(code.0).ok()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        write!(f, "{}", s)
    }
}

/// Well-known option numbers (RFC 7252 §12.2).
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum OptionNumber {
    IfMatch = 1,
    UriHost = 3,
    ETag = 4,
    IfNoneMatch = 5,
    UriPort = 7,
    LocationPath = 8,
    UriPath = 11,
    ContentFormat = 12,
    MaxAge = 14,
    UriQuery = 15,
    Accept = 17,
    LocationQuery = 20,
    ProxyUri = 35,
    ProxyScheme = 39,
    Size1 = 60,
}

/// Content-Format registry values this server uses.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum ContentFormat {
    TextPlain = 0,
    LinkFormat = 40,
    Xml = 41,
    OctetStream = 42,
    Exi = 47,
    Json = 50,
    Cbor = 60,
}

/// One (number, value) pair from the ordered option sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

/// A decoded (or to-be-encoded) CoAP message.
///
/// The option list is private: [`Message::add_option`] keeps it sorted by
/// ascending number at insertion time, which is the invariant the encoder
/// relies on. Duplicate numbers are allowed and keep insertion order among
/// themselves (Uri-Path repeats per segment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: u8,
    pub mtype: MsgType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    options: Vec<CoapOption>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new() -> Self {
        Message {
            version: COAP_VERSION,
            mtype: MsgType::Confirmable,
            code: Code::EMPTY,
            message_id: 0,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Inserts an option preserving ascending-number order. An option with a
    /// number equal to an existing one lands after it.
    pub fn add_option(
        &mut self,
        number: impl Into<u16>,
        value: &[u8],
    ) -> Result<(), CodecError> {
        if self.options.len() >= MAX_OPTIONS {
            return Err(CodecError::Options);
        }
        if value.len() > MAX_OPTION_VALUE_LENGTH {
            return Err(CodecError::Options);
        }
        let number = number.into();
        let pos = self
            .options
            .iter()
            .position(|opt| opt.number > number)
            .unwrap_or(self.options.len());
        self.options.insert(
            pos,
            CoapOption {
                number,
                value: value.to_vec(),
            },
        );
        Ok(())
    }

    /// First option with the given number, if any.
    pub fn find_option(&self, number: impl Into<u16>) -> Option<&CoapOption> {
        let number = number.into();
        self.options.iter().find(|opt| opt.number == number)
    }

    pub fn options(&self) -> &[CoapOption] {
        &self.options
    }

    /// Joins the Uri-Path option values with `/`, without a leading slash.
    /// Non-UTF-8 segments are replaced lossily; the result is truncated at
    /// [`MAX_PATH_LENGTH`] bytes.
    pub fn uri_path(&self) -> String {
        let mut path = String::new();
        for opt in &self.options {
            if opt.number != u16::from(OptionNumber::UriPath) {
                continue;
            }
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(&String::from_utf8_lossy(&opt.value));
        }
        if path.len() > MAX_PATH_LENGTH {
            let mut cut = MAX_PATH_LENGTH;
            while !path.is_char_boundary(cut) {
                cut -= 1;
            }
            path.truncate(cut);
        }
        path
    }

    pub fn is_request(&self) -> bool {
        self.code.class() == 0 && self.code != Code::EMPTY
    }

    pub fn is_response(&self) -> bool {
        let cls = self.code.class();
        (2..=5).contains(&cls)
    }

    /// Structural validity: the fields a handler-built message could get
    /// wrong before it reaches the encoder.
    pub fn is_valid(&self) -> bool {
        self.version == COAP_VERSION && self.token.len() <= MAX_TOKEN_LENGTH
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}
