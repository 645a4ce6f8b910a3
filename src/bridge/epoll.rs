//! Thin wrapper over the Linux epoll readiness interface, keyed by raw
//! descriptor. Registration is the only ownership this layer holds; the
//! descriptors themselves belong to the session.

use crate::attach::{close_fd, errno_error};
use anyhow::{anyhow, Result};
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

/// Upper bound on readiness reports delivered per wait.
pub const MAX_EVENTS: usize = 64;

/// One readiness report from the kernel.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub flags: u32,
}

impl Event {
    pub fn readable(&self) -> bool {
        self.flags & libc::EPOLLIN as u32 != 0
    }

    pub fn hangup(&self) -> bool {
        self.flags & libc::EPOLLHUP as u32 != 0
    }

    /// Any flag outside readable/hang-up breaks the routing contract.
    pub fn unexpected(&self) -> bool {
        self.flags & !(libc::EPOLLIN as u32 | libc::EPOLLHUP as u32) != 0
    }
}

pub struct Epoll {
    epfd: RawFd,
}

impl Epoll {
    pub fn new() -> Result<Self> {
        // SAFETY: epoll_create1 allocates a fresh descriptor; CLOEXEC keeps
        // it out of any future exec.
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(errno_error("epoll_create1 failed"));
        }
        Ok(Self { epfd })
    }

    /// Register `fd` for readable events. Hang-up is always reported.
    pub fn register(&self, fd: RawFd) -> Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };
        // SAFETY: event points at an initialized struct and fd stays valid
        // for the duration of the call.
        if unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut event) } != 0 {
            return Err(errno_error("epoll_ctl(ADD) failed"));
        }
        Ok(())
    }

    /// Drop the registration for `fd`. Must happen before the descriptor is
    /// closed and reopened, so a recycled fd number cannot alias a stale
    /// registration.
    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        // SAFETY: DEL ignores the event argument on modern kernels but
        // still wants a non-null pointer.
        if unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut event) } != 0 {
            return Err(errno_error("epoll_ctl(DEL) failed"));
        }
        Ok(())
    }

    /// Block until at least one registered descriptor is ready, retrying
    /// transparently when a signal interrupts the wait.
    pub fn wait(&self, events: &mut Vec<Event>) -> Result<()> {
        // SAFETY: epoll_event is a plain C struct; zeroed is a valid
        // baseline for an output buffer.
        let mut raw: [libc::epoll_event; MAX_EVENTS] = unsafe { mem::zeroed() };
        loop {
            // SAFETY: raw is a valid buffer of MAX_EVENTS entries.
            let count =
                unsafe { libc::epoll_wait(self.epfd, raw.as_mut_ptr(), MAX_EVENTS as i32, -1) };
            if count < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(anyhow!("epoll_wait failed: {err}"));
            }
            events.clear();
            for entry in raw.iter().take(count as usize) {
                events.push(Event {
                    fd: entry.u64 as RawFd,
                    flags: entry.events,
                });
            }
            return Ok(());
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        close_fd(self.epfd);
    }
}
