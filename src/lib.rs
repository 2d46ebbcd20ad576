//! A compact CoAP (RFC 7252) server over UDP for constrained telemetry
//! senders: single-threaded, event-driven, with an in-memory ring buffer of
//! recent telemetry payloads queryable over the same protocol.
//!
//! Layering, leaves first: message model ([`coap`]) → wire codec
//! ([`codec`]) → UDP transport ([`transport`]) → reactor ([`reactor`]) →
//! dispatcher/handlers → [`server`] glue.

pub mod clock;
pub mod coap;
pub mod codec;
pub mod dispatcher;
pub mod handlers;
pub mod reactor;
pub mod server;
pub mod telemetry;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use server::Server;
