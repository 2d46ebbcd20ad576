//! Thin non-blocking UDP socket layer over `nix::sys::socket`.
//!
//! EAGAIN is part of the normal drain protocol and surfaces as `Ok(None)`;
//! everything else is an [`Errno`] the caller decides how to handle.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{
    self, sockopt, AddressFamily, MsgFlags, SockFlag, SockType, SockaddrIn,
    SockaddrStorage,
};
use nix::unistd;

/// Creates an IPv4 UDP socket.
pub fn create_udp() -> nix::Result<RawFd> {
    socket::socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        None,
    )
}

/// Binds to the IPv4 wildcard address; `port` 0 requests an ephemeral port.
pub fn bind_wildcard(fd: RawFd, port: u16) -> nix::Result<()> {
    let addr = SockaddrIn::new(0, 0, 0, 0, port);
    socket::bind(fd, &addr)
}

pub fn set_reuseaddr(fd: RawFd) -> nix::Result<()> {
    socket::setsockopt(fd, sockopt::ReuseAddr, &true)
}

pub fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Port the socket actually bound to (differs from the requested one when
/// binding with port 0).
pub fn local_port(fd: RawFd) -> nix::Result<u16> {
    let addr: SockaddrIn = socket::getsockname(fd)?;
    Ok(addr.port())
}

pub fn close(fd: RawFd) {
    let _ = unistd::close(fd);
}

/// Receives one datagram. `Ok(None)` means nothing is queued right now;
/// callers drain until they see it.
pub fn recv_from(fd: RawFd, buf: &mut [u8]) -> nix::Result<Option<(usize, SockaddrStorage)>> {
    match socket::recvfrom::<SockaddrStorage>(fd, buf) {
        Ok((n, Some(peer))) => Ok(Some((n, peer))),
        Ok((_, None)) => Err(Errno::EINVAL),
        Err(Errno::EAGAIN) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Sends one datagram. `Ok(None)` means the socket is momentarily unable to
/// send; UDP is best-effort so callers drop the datagram.
pub fn send_to(fd: RawFd, buf: &[u8], peer: &SockaddrStorage) -> nix::Result<Option<usize>> {
    match socket::sendto(fd, buf, peer, MsgFlags::empty()) {
        Ok(n) => Ok(Some(n)),
        Err(Errno::EAGAIN) => Ok(None),
        Err(err) => Err(err),
    }
}
