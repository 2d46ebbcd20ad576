//! Application handlers behind the dispatcher's routes.
//!
//! A handler receives the validated request and a response whose envelope
//! (version, message id, token, type) is already filled in. It sets the
//! response code and, where applicable, payload and Content-Format. Business
//! rejections (4.xx/5.xx) are `Ok`; `Err` means an unrecoverable internal
//! failure and makes the dispatcher answer 5.00.

use std::rc::Rc;

use color_eyre::Result;
use log::debug;

use crate::clock::Clock;
use crate::coap::{Code, ContentFormat, Message, OptionNumber};
use crate::telemetry::TelemetryStore;

/// Payload budget leaving room for header, token and options inside one
/// 1472-byte datagram.
pub const MAX_RESPONSE_PAYLOAD: usize = 1280;

/// State shared by all handlers for the lifetime of the server.
pub struct AppContext {
    pub telemetry: TelemetryStore,
    pub clock: Rc<dyn Clock>,
}

impl AppContext {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        AppContext {
            telemetry: TelemetryStore::new(),
            clock,
        }
    }
}

// Content-Format values are unsigned integers in minimal width; zero is the
// empty string (RFC 7252 §3.2).
fn set_content_format(resp: &mut Message, format: ContentFormat) -> Result<()> {
    let raw = u16::from(format);
    let value = match raw {
        0 => Vec::new(),
        1..=255 => vec![raw as u8],
        _ => vec![(raw >> 8) as u8, raw as u8],
    };
    resp.add_option(OptionNumber::ContentFormat, &value)?;
    Ok(())
}

/// GET /hello (legacy connectivity probe).
pub fn hello(_req: &Message, resp: &mut Message, _ctx: &mut AppContext) -> Result<()> {
    resp.payload = b"hello".to_vec();
    set_content_format(resp, ContentFormat::TextPlain)?;
    resp.code = Code::CONTENT;
    Ok(())
}

/// GET /time (legacy): current milliseconds as ASCII decimal.
pub fn time(_req: &Message, resp: &mut Message, ctx: &mut AppContext) -> Result<()> {
    resp.payload = ctx.clock.now_ms().to_string().into_bytes();
    set_content_format(resp, ContentFormat::TextPlain)?;
    resp.code = Code::CONTENT;
    Ok(())
}

/// POST /echo (legacy): request payload returned untouched.
pub fn echo(req: &Message, resp: &mut Message, _ctx: &mut AppContext) -> Result<()> {
    resp.payload = req.payload.clone();
    set_content_format(resp, ContentFormat::TextPlain)?;
    resp.code = Code::CONTENT;
    Ok(())
}

/// POST /test/echo: like the legacy echo, but mirrors the request's
/// Content-Format when it carries one.
pub fn test_echo(req: &Message, resp: &mut Message, _ctx: &mut AppContext) -> Result<()> {
    resp.payload = req.payload.clone();
    match req.find_option(OptionNumber::ContentFormat) {
        Some(opt) => resp.add_option(OptionNumber::ContentFormat, &opt.value)?,
        None => set_content_format(resp, ContentFormat::TextPlain)?,
    }
    resp.code = Code::CONTENT;
    Ok(())
}

/// POST /api/v1/telemetry: stores one JSON document in the ring buffer.
pub fn telemetry_post(req: &Message, resp: &mut Message, ctx: &mut AppContext) -> Result<()> {
    let json = match std::str::from_utf8(&req.payload) {
        Ok(json) => json,
        Err(_) => {
            debug!("telemetry post rejected: payload is not UTF-8");
            resp.code = Code::BAD_REQUEST;
            return Ok(());
        }
    };
    let now = ctx.clock.now_ms();
    match ctx.telemetry.add(json, now) {
        Ok(()) => {
            resp.code = Code::CREATED;
        }
        Err(err) => {
            debug!("telemetry post rejected: {}", err);
            resp.code = Code::BAD_REQUEST;
        }
    }
    Ok(())
}

/// GET /api/v1/telemetry: recent entries as a JSON array, newest retained
/// when the full set would not fit one datagram.
pub fn telemetry_get(_req: &Message, resp: &mut Message, ctx: &mut AppContext) -> Result<()> {
    resp.payload = ctx.telemetry.serialize(MAX_RESPONSE_PAYLOAD).into_bytes();
    set_content_format(resp, ContentFormat::Json)?;
    resp.code = Code::CONTENT;
    Ok(())
}

/// GET /api/v1/health: liveness probe.
pub fn health(_req: &Message, resp: &mut Message, _ctx: &mut AppContext) -> Result<()> {
    resp.payload = br#"{"status":"ok"}"#.to_vec();
    set_content_format(resp, ContentFormat::Json)?;
    resp.code = Code::CONTENT;
    Ok(())
}

/// GET /api/v1/status: store counters.
pub fn status(_req: &Message, resp: &mut Message, ctx: &mut AppContext) -> Result<()> {
    let stats = ctx.telemetry.stats();
    resp.payload = format!(
        "{{\"total_received\":{},\"current_count\":{},\"capacity\":{},\"last_received_ms\":{}}}",
        stats.total_received, stats.current_count, stats.capacity, stats.last_received_ms
    )
    .into_bytes();
    set_content_format(resp, ContentFormat::Json)?;
    resp.code = Code::CONTENT;
    Ok(())
}
