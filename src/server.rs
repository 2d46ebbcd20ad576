//! Server glue: one non-blocking UDP socket registered on the reactor, a
//! drain-until-EAGAIN read callback, and the decode → dispatch → encode →
//! send turn for each datagram.
//!
//! Malformed datagrams are dropped without a response so the server cannot
//! be used to amplify garbage traffic; valid requests always get an answer,
//! even if it is an error response.

#![deny(missing_docs)]

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{debug, info, warn};
use nix::sys::socket::SockaddrStorage;

use crate::clock::Clock;
use crate::coap::{Code, Message, MsgType, MAX_MESSAGE_SIZE};
use crate::codec;
use crate::dispatcher;
use crate::handlers::AppContext;
use crate::reactor::{EventLoop, Events};
use crate::transport;

/// A CoAP server bound to one UDP socket, driven by its own [`EventLoop`].
pub struct Server {
    reactor: EventLoop,
    sock: RawFd,
    port: u16,
    context: Rc<RefCell<AppContext>>,
}

impl Server {
    /// Creates the socket (REUSEADDR, non-blocking), binds it to the IPv4
    /// wildcard at `port` (0 picks an ephemeral port) and registers it for
    /// read events.
    pub fn new(port: u16, clock: Rc<dyn Clock>) -> Result<Server> {
        let context = Rc::new(RefCell::new(AppContext::new(Rc::clone(&clock))));
        let mut reactor = EventLoop::new(clock)?;
        let sock = transport::create_udp().wrap_err("creating UDP socket")?;
        match Self::setup(&mut reactor, sock, port, Rc::clone(&context)) {
            Ok(bound) => {
                info!("listening on UDP/{}", bound);
                Ok(Server {
                    reactor,
                    sock,
                    port: bound,
                    context,
                })
            }
            Err(err) => {
                transport::close(sock);
                Err(err)
            }
        }
    }

    fn setup(
        reactor: &mut EventLoop,
        sock: RawFd,
        port: u16,
        context: Rc<RefCell<AppContext>>,
    ) -> Result<u16> {
        transport::set_reuseaddr(sock).wrap_err("setting SO_REUSEADDR")?;
        transport::set_nonblocking(sock).wrap_err("setting O_NONBLOCK")?;
        transport::bind_wildcard(sock, port)
            .wrap_err_with(|| format!("binding UDP port {}", port))?;
        let bound = transport::local_port(sock)?;

        reactor.add_fd(sock, Events::READ, move |_reactor, fd, events| {
            if !events.contains(Events::READ) {
                return;
            }
            let mut buf = [0u8; MAX_MESSAGE_SIZE];
            loop {
                match transport::recv_from(fd, &mut buf) {
                    Ok(None) => break,
                    Ok(Some((n, peer))) => {
                        process_datagram(&mut context.borrow_mut(), fd, &buf[..n], &peer);
                    }
                    Err(err) => {
                        warn!("recvfrom failed: {}", err);
                        break;
                    }
                }
            }
        })?;
        Ok(bound)
    }

    /// Port the socket actually bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shared handler state (telemetry store and clock).
    pub fn context(&self) -> Rc<RefCell<AppContext>> {
        Rc::clone(&self.context)
    }

    /// The reactor driving this server, e.g. for registering extra timers.
    pub fn reactor_mut(&mut self) -> &mut EventLoop {
        &mut self.reactor
    }

    /// Runs the event loop: forever when `run_timeout_ms < 0`, one bounded
    /// iteration otherwise.
    pub fn run(&mut self, run_timeout_ms: i64) -> Result<()> {
        self.reactor.run(run_timeout_ms)
    }

    /// Makes a `run(-1)` loop return.
    pub fn stop(&mut self) {
        self.reactor.stop();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.reactor.remove_fd(self.sock);
        transport::close(self.sock);
    }
}

fn format_peer(peer: &SockaddrStorage) -> String {
    if let Some(v4) = peer.as_sockaddr_in() {
        v4.to_string()
    } else if let Some(v6) = peer.as_sockaddr_in6() {
        v6.to_string()
    } else {
        "unknown".to_string()
    }
}

fn process_datagram(ctx: &mut AppContext, fd: RawFd, data: &[u8], peer: &SockaddrStorage) {
    let req = match codec::decode(data) {
        Ok(req) => req,
        Err(err) => {
            // silent drop; a reply would amplify malformed input
            debug!("dropping {}B datagram: {}", data.len(), err);
            return;
        }
    };

    info!(
        target: "coap",
        "RX {} /{} from {} mid={:#06x} tkl={} payload={}B",
        req.code,
        req.uri_path(),
        format_peer(peer),
        req.message_id,
        req.token.len(),
        req.payload.len()
    );

    let mut resp = Message::new();
    if let Err(err) = dispatcher::handle_request(&req, &mut resp, ctx) {
        warn!("dispatcher failed: {:#}", err);
        if !req.is_request() {
            return;
        }
        // fall back to a bare 4.00 with the envelope mirrored
        resp = Message::new();
        resp.message_id = req.message_id;
        resp.token = req.token.clone();
        resp.mtype = if req.mtype == MsgType::Confirmable {
            MsgType::Acknowledgment
        } else {
            MsgType::NonConfirmable
        };
        resp.code = Code::BAD_REQUEST;
    }

    let mut out = [0u8; MAX_MESSAGE_SIZE];
    let n = match codec::encode(&resp, &mut out) {
        Ok(n) => n,
        Err(err) => {
            warn!(
                "response for mid={:#06x} not encodable: {}",
                resp.message_id, err
            );
            return;
        }
    };

    if resp.code.class() == 2 {
        info!(
            target: "coap",
            "TX {} to {} mid={:#06x} payload={}B",
            resp.code,
            format_peer(peer),
            resp.message_id,
            resp.payload.len()
        );
    }

    match transport::send_to(fd, &out[..n], peer) {
        Ok(Some(_)) => {}
        Ok(None) => debug!(
            "socket busy, dropping response mid={:#06x}",
            resp.message_id
        ),
        Err(err) => warn!("sendto {} failed: {}", format_peer(peer), err),
    }
}
