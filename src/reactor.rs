//! Single-threaded readiness reactor: fd multiplexing plus a small timer
//! table, backed by epoll on Linux and kqueue on macOS/BSD.
//!
//! Callbacks receive `&mut EventLoop` and may freely add or remove fds and
//! timers from inside a dispatch; the iteration in progress tolerates such
//! mutation and never delivers the same readiness twice.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use bitflags::bitflags;
use color_eyre::eyre::{bail, ensure};
use color_eyre::Result;

use crate::clock::Clock;

/// Fd table capacity (slots are indexed by fd).
pub const MAX_FDS: usize = 1024;
/// Timer table capacity.
pub const MAX_TIMERS: usize = 64;

// Poll wait when nothing bounds it, so stop() stays observable.
const DEFAULT_WAIT_MS: i64 = 1000;

bitflags! {
    /// Readiness interest / result mask.
    pub struct Events: u8 {
        /// Fd readable.
        const READ = 0x01;
        /// Fd writable.
        const WRITE = 0x02;
        /// Error condition on the fd.
        const ERROR = 0x04;
    }
}

type FdCallback = Rc<RefCell<dyn FnMut(&mut EventLoop, RawFd, Events)>>;
type TimerCallback = Rc<RefCell<dyn FnMut(&mut EventLoop)>>;

struct FdHandler {
    events: Events,
    callback: FdCallback,
}

struct Timer {
    id: u64,
    period_ms: u64,
    periodic: bool,
    next_fire: u64,
    callback: TimerCallback,
}

/// The event loop. Single-threaded; every callback runs synchronously on the
/// thread that called [`EventLoop::run`].
pub struct EventLoop {
    poller: sys::Poller,
    clock: Rc<dyn Clock>,
    handlers: Vec<Option<FdHandler>>,
    timers: Vec<Option<Timer>>,
    running: bool,
    next_timer_id: u64,
}

impl EventLoop {
    pub fn new(clock: Rc<dyn Clock>) -> Result<EventLoop> {
        let poller = sys::Poller::new()?;
        let mut handlers = Vec::with_capacity(MAX_FDS);
        handlers.resize_with(MAX_FDS, || None);
        let mut timers = Vec::with_capacity(MAX_TIMERS);
        timers.resize_with(MAX_TIMERS, || None);
        Ok(EventLoop {
            poller,
            clock,
            handlers,
            timers,
            running: false,
            next_timer_id: 1,
        })
    }

    /// Registers `fd` with the given interest mask. The callback runs once
    /// per dispatched readiness with the loop itself as first argument.
    pub fn add_fd(
        &mut self,
        fd: RawFd,
        events: Events,
        callback: impl FnMut(&mut EventLoop, RawFd, Events) + 'static,
    ) -> Result<()> {
        ensure!(fd >= 0 && (fd as usize) < MAX_FDS, "fd {fd} out of range");
        ensure!(
            self.handlers[fd as usize].is_none(),
            "fd {fd} already registered"
        );
        self.poller.register(fd, events)?;
        self.handlers[fd as usize] = Some(FdHandler {
            events,
            callback: Rc::new(RefCell::new(callback)),
        });
        Ok(())
    }

    /// Unregisters `fd`. Removing an unknown fd is a no-op.
    pub fn remove_fd(&mut self, fd: RawFd) -> Result<()> {
        ensure!(fd >= 0 && (fd as usize) < MAX_FDS, "fd {fd} out of range");
        if self.handlers[fd as usize].take().is_some() {
            self.poller.deregister(fd);
        }
        Ok(())
    }

    /// Replaces the interest mask of a registered fd.
    pub fn modify_fd(&mut self, fd: RawFd, events: Events) -> Result<()> {
        ensure!(fd >= 0 && (fd as usize) < MAX_FDS, "fd {fd} out of range");
        match self.handlers[fd as usize].as_mut() {
            Some(handler) => {
                self.poller.reregister(fd, events)?;
                handler.events = events;
                Ok(())
            }
            None => bail!("fd {fd} not registered"),
        }
    }

    /// Arms a timer due in `timeout_ms`. Returns its id (always > 0).
    pub fn add_timer(
        &mut self,
        timeout_ms: u64,
        periodic: bool,
        callback: impl FnMut(&mut EventLoop) + 'static,
    ) -> Result<u64> {
        let slot = match self.timers.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => bail!("timer table full ({MAX_TIMERS} entries)"),
        };
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers[slot] = Some(Timer {
            id,
            period_ms: timeout_ms,
            periodic,
            next_fire: self.clock.now_ms() + timeout_ms,
            callback: Rc::new(RefCell::new(callback)),
        });
        Ok(id)
    }

    /// Disarms a timer. Unknown ids are ignored.
    pub fn remove_timer(&mut self, timer_id: u64) {
        for slot in self.timers.iter_mut() {
            if matches!(slot, Some(t) if t.id == timer_id) {
                *slot = None;
                return;
            }
        }
    }

    /// Runs the loop.
    ///
    /// With `run_timeout_ms < 0` it loops until [`EventLoop::stop`]; with
    /// `run_timeout_ms >= 0` it performs exactly one poll+dispatch iteration
    /// bounded by that wait and returns.
    pub fn run(&mut self, run_timeout_ms: i64) -> Result<()> {
        self.running = true;
        let mut ready = Vec::with_capacity(sys::MAX_EVENTS);
        loop {
            let wait = self.compute_wait(run_timeout_ms);
            ready.clear();
            self.poller.wait(wait, &mut ready)?;

            for (fd, events) in ready.drain(..) {
                // the handler may have been removed by an earlier callback
                // in this same batch
                let (interest, callback) = match &self.handlers[fd as usize] {
                    Some(handler) => (handler.events, Rc::clone(&handler.callback)),
                    None => continue,
                };
                // errors are delivered regardless of the interest mask
                if (events & (interest | Events::ERROR)).is_empty() {
                    continue;
                }
                (&mut *callback.borrow_mut())(self, fd, events);
            }

            self.process_timers();

            if run_timeout_ms >= 0 || !self.running {
                return Ok(());
            }
        }
    }

    /// Makes a `run(-1)` loop return after the current iteration.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    fn compute_wait(&self, run_timeout_ms: i64) -> i64 {
        let now = self.clock.now_ms();
        let mut to_timer: i64 = -1;
        for timer in self.timers.iter().flatten() {
            let delta = (timer.next_fire as i64 - now as i64).max(0);
            if to_timer < 0 || delta < to_timer {
                to_timer = delta;
            }
        }
        match (run_timeout_ms >= 0, to_timer >= 0) {
            (true, true) => run_timeout_ms.min(to_timer),
            (true, false) => run_timeout_ms,
            (false, true) => to_timer,
            (false, false) => DEFAULT_WAIT_MS,
        }
    }

    fn process_timers(&mut self) {
        let now = self.clock.now_ms();
        // snapshot of what is due: timers armed by a callback in this pass
        // wait for the next one
        let due: Vec<u64> = self
            .timers
            .iter()
            .flatten()
            .filter(|t| t.next_fire <= now)
            .map(|t| t.id)
            .collect();

        for id in due {
            let callback = match self.timers.iter().flatten().find(|t| t.id == id) {
                Some(timer) => Rc::clone(&timer.callback),
                // removed by an earlier callback in this pass
                None => continue,
            };
            (&mut *callback.borrow_mut())(self);

            let slot = self
                .timers
                .iter()
                .position(|s| matches!(s, Some(t) if t.id == id));
            if let Some(slot) = slot {
                if let Some(timer) = self.timers[slot].as_mut() {
                    if timer.periodic {
                        timer.next_fire = now + timer.period_ms;
                    } else {
                        self.timers[slot] = None;
                    }
                }
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod sys {
    //! epoll backend.

    use std::os::unix::io::RawFd;

    use nix::errno::Errno;
    use nix::sys::epoll::{
        epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent,
        EpollFlags, EpollOp,
    };
    use nix::unistd;

    use super::Events;

    pub const MAX_EVENTS: usize = 64;

    pub struct Poller {
        epfd: RawFd,
    }

    fn interest(events: Events) -> EpollFlags {
        let mut flags = EpollFlags::empty();
        if events.contains(Events::READ) {
            flags |= EpollFlags::EPOLLIN;
        }
        if events.contains(Events::WRITE) {
            flags |= EpollFlags::EPOLLOUT;
        }
        flags
    }

    impl Poller {
        pub fn new() -> nix::Result<Poller> {
            let epfd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC)?;
            Ok(Poller { epfd })
        }

        pub fn register(&self, fd: RawFd, events: Events) -> nix::Result<()> {
            let mut ev = EpollEvent::new(interest(events), fd as u64);
            epoll_ctl(self.epfd, EpollOp::EpollCtlAdd, fd, &mut ev)
        }

        pub fn reregister(&self, fd: RawFd, events: Events) -> nix::Result<()> {
            let mut ev = EpollEvent::new(interest(events), fd as u64);
            epoll_ctl(self.epfd, EpollOp::EpollCtlMod, fd, &mut ev)
        }

        pub fn deregister(&self, fd: RawFd) {
            let _ = epoll_ctl(self.epfd, EpollOp::EpollCtlDel, fd, None);
        }

        pub fn wait(
            &self,
            timeout_ms: i64,
            ready: &mut Vec<(RawFd, Events)>,
        ) -> nix::Result<()> {
            let mut events = [EpollEvent::empty(); MAX_EVENTS];
            let n = match epoll_wait(self.epfd, &mut events, timeout_ms as isize) {
                Ok(n) => n,
                // interruption is not an error; report zero events
                Err(Errno::EINTR) => 0,
                Err(err) => return Err(err),
            };
            for ev in &events[..n] {
                let mut out = Events::empty();
                if ev.events().contains(EpollFlags::EPOLLIN) {
                    out |= Events::READ;
                }
                if ev.events().contains(EpollFlags::EPOLLOUT) {
                    out |= Events::WRITE;
                }
                if ev.events().contains(EpollFlags::EPOLLERR) {
                    out |= Events::ERROR;
                }
                ready.push((ev.data() as RawFd, out));
            }
            Ok(())
        }
    }

    impl Drop for Poller {
        fn drop(&mut self) {
            let _ = unistd::close(self.epfd);
        }
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
mod sys {
    //! kqueue backend. READ and WRITE interest are separate filters.

    use std::os::unix::io::RawFd;

    use nix::errno::Errno;
    use nix::sys::event::{kevent, kqueue, EventFilter, EventFlag, FilterFlag, KEvent};
    use nix::unistd;

    use super::Events;

    pub const MAX_EVENTS: usize = 64;

    pub struct Poller {
        kq: RawFd,
    }

    fn change(fd: RawFd, filter: EventFilter, flags: EventFlag) -> KEvent {
        KEvent::new(fd as usize, filter, flags, FilterFlag::empty(), 0, 0)
    }

    impl Poller {
        pub fn new() -> nix::Result<Poller> {
            let kq = kqueue()?;
            Ok(Poller { kq })
        }

        fn apply(&self, fd: RawFd, filter: EventFilter, wanted: bool) -> nix::Result<()> {
            let flags = if wanted {
                EventFlag::EV_ADD | EventFlag::EV_ENABLE
            } else {
                EventFlag::EV_DELETE
            };
            let changes = [change(fd, filter, flags)];
            match kevent(self.kq, &changes, &mut [], 0) {
                Ok(_) => Ok(()),
                // deleting a filter that was never added
                Err(Errno::ENOENT) if !wanted => Ok(()),
                Err(err) => Err(err),
            }
        }

        pub fn register(&self, fd: RawFd, events: Events) -> nix::Result<()> {
            self.apply(fd, EventFilter::EVFILT_READ, events.contains(Events::READ))?;
            self.apply(fd, EventFilter::EVFILT_WRITE, events.contains(Events::WRITE))
        }

        pub fn reregister(&self, fd: RawFd, events: Events) -> nix::Result<()> {
            self.register(fd, events)
        }

        pub fn deregister(&self, fd: RawFd) {
            let _ = self.apply(fd, EventFilter::EVFILT_READ, false);
            let _ = self.apply(fd, EventFilter::EVFILT_WRITE, false);
        }

        pub fn wait(
            &self,
            timeout_ms: i64,
            ready: &mut Vec<(RawFd, Events)>,
        ) -> nix::Result<()> {
            let mut events = [change(0, EventFilter::EVFILT_READ, EventFlag::empty());
                MAX_EVENTS];
            let n = match kevent(self.kq, &[], &mut events, timeout_ms.max(0) as usize) {
                Ok(n) => n,
                Err(Errno::EINTR) => 0,
                Err(err) => return Err(err),
            };
            for ev in &events[..n] {
                let mut out = Events::empty();
                match ev.filter() {
                    Ok(EventFilter::EVFILT_READ) => out |= Events::READ,
                    Ok(EventFilter::EVFILT_WRITE) => out |= Events::WRITE,
                    _ => {}
                }
                if ev.flags().contains(EventFlag::EV_ERROR) {
                    out |= Events::ERROR;
                }
                ready.push((ev.ident() as RawFd, out));
            }
            Ok(())
        }
    }

    impl Drop for Poller {
        fn drop(&mut self) {
            let _ = unistd::close(self.kq);
        }
    }
}
