//! Routes decoded requests to application handlers and owns the response
//! envelope: message id and token mirrored bit-identically, piggybacked ACK
//! for confirmable requests, NON for non-confirmable ones.

use color_eyre::eyre::{bail, Result};
use log::{info, warn};

use crate::coap::{Code, Message, Method, MsgType};
use crate::handlers::{self, AppContext};

/// Mirrors the request envelope into a fresh response.
pub fn init_response(req: &Message, resp: &mut Message) {
    *resp = Message::new();
    resp.message_id = req.message_id;
    resp.token = req.token.clone();
    resp.mtype = match req.mtype {
        MsgType::Confirmable => MsgType::Acknowledgment,
        MsgType::NonConfirmable => MsgType::NonConfirmable,
        // should not occur for a server; answer ACK by default
        _ => MsgType::Acknowledgment,
    };
}

/// Routes one request and fills `resp`.
///
/// Routing misses (4.04, 4.05), non-method codes (4.00) and handler
/// failures (5.00) still produce a valid, encodable response and return
/// `Ok`. `Err` is reserved for requests no response can be built for.
pub fn handle_request(req: &Message, resp: &mut Message, ctx: &mut AppContext) -> Result<()> {
    if !req.is_valid() {
        bail!(
            "invalid message (version={}, token_len={})",
            req.version,
            req.token.len()
        );
    }
    if !req.is_request() {
        bail!("not a request (code={})", req.code);
    }

    init_response(req, resp);

    let method = match Method::from_code(req.code) {
        Some(method) => method,
        None => {
            warn!("unknown method code {}", req.code);
            resp.code = Code::BAD_REQUEST;
            return Ok(());
        }
    };
    let path = req.uri_path();

    info!("dispatch {} /{}", method, path);

    let outcome = match path.as_str() {
        // production API
        "api/v1/telemetry" => match method {
            Method::Post => handlers::telemetry_post(req, resp, ctx),
            Method::Get => handlers::telemetry_get(req, resp, ctx),
            _ => return method_not_allowed(resp, method, &path),
        },
        "api/v1/health" => match method {
            Method::Get => handlers::health(req, resp, ctx),
            _ => return method_not_allowed(resp, method, &path),
        },
        "api/v1/status" => match method {
            Method::Get => handlers::status(req, resp, ctx),
            _ => return method_not_allowed(resp, method, &path),
        },
        // testing
        "test/echo" => match method {
            Method::Post => handlers::test_echo(req, resp, ctx),
            _ => return method_not_allowed(resp, method, &path),
        },
        // legacy, kept for deployed senders
        "hello" => match method {
            Method::Get => handlers::hello(req, resp, ctx),
            _ => return method_not_allowed(resp, method, &path),
        },
        "time" => match method {
            Method::Get => handlers::time(req, resp, ctx),
            _ => return method_not_allowed(resp, method, &path),
        },
        "echo" => match method {
            Method::Post => handlers::echo(req, resp, ctx),
            _ => return method_not_allowed(resp, method, &path),
        },
        _ => {
            warn!("no route for /{}", path);
            resp.code = Code::NOT_FOUND;
            return Ok(());
        }
    };

    if let Err(err) = outcome {
        warn!("handler for /{} failed: {:#}", path, err);
        init_response(req, resp);
        resp.code = Code::INTERNAL_SERVER_ERROR;
    }
    Ok(())
}

fn method_not_allowed(resp: &mut Message, method: Method, path: &str) -> Result<()> {
    warn!("{} not allowed for /{}", method, path);
    resp.code = Code::METHOD_NOT_ALLOWED;
    Ok(())
}
