//! Event routing core: a single blocking epoll wait drives all forwarding
//! between the real terminal, the child process and the session files.

pub mod epoll;
pub mod io;

use crate::capture::CaptureFs;
use anyhow::{bail, Context, Result};
use self::epoll::{Epoll, Event};
use self::io::{read_chunk, write_all, ReadOutcome};
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use tracing::{debug, info};

/// Fixed chunk size for every forwarding read. A short read is valid and
/// is forwarded as-is.
pub const CHUNK_SIZE: usize = 4096;

/// The descriptors the routing table is built over. In pty mode
/// `child_input` and `child_stdout` are the same master fd.
pub struct EndpointFds {
    pub real_stdin: RawFd,
    pub real_stdout: RawFd,
    pub real_stderr: RawFd,
    pub child_input: RawFd,
    pub child_stdout: RawFd,
    pub child_stderr: Option<RawFd>,
}

impl EndpointFds {
    /// The standard wiring: real endpoints are the process's own streams.
    pub fn standard(child_input: RawFd, child_stdout: RawFd, child_stderr: Option<RawFd>) -> Self {
        Self {
            real_stdin: libc::STDIN_FILENO,
            real_stdout: libc::STDOUT_FILENO,
            real_stderr: libc::STDERR_FILENO,
            child_input,
            child_stdout,
            child_stderr,
        }
    }
}

/// The role a ready descriptor plays in the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    RealStdin,
    Injection,
    ChildStdout,
    ChildStderr,
}

/// What the loop should do after one event has been handled.
enum Disposition {
    Continue,
    /// The child's output side hung up: the bridge is done.
    Shutdown,
}

pub struct Bridge<'a> {
    capture: &'a CaptureFs,
    epoll: Epoll,
    fds: EndpointFds,
    out_sink: RawFd,
    err_sink: Option<RawFd>,
    /// Always `Some` while the loop runs; only the reopen cycle takes it
    /// out, so that the old descriptor is closed before a fresh one opens.
    injection: Option<File>,
    /// Reusable scratch buffer for every read/route step; no bytes are
    /// retained in it across events.
    scratch: [u8; CHUNK_SIZE],
}

impl<'a> Bridge<'a> {
    /// Register every live endpoint and open the injection channel.
    pub fn new(capture: &'a CaptureFs, fds: EndpointFds) -> Result<Self> {
        let epoll = Epoll::new()?;
        epoll
            .register(fds.real_stdin)
            .context("failed to register real stdin")?;
        epoll
            .register(fds.child_stdout)
            .context("failed to register child output")?;
        if let Some(fd) = fds.child_stderr {
            epoll
                .register(fd)
                .context("failed to register child stderr")?;
        }
        let injection = capture.open_injection()?;
        epoll
            .register(injection.as_raw_fd())
            .context("failed to register injection FIFO")?;

        let out_sink = capture.out_file.as_raw_fd();
        let err_sink = capture.err_file.as_ref().map(|file| file.as_raw_fd());

        Ok(Self {
            capture,
            epoll,
            fds,
            out_sink,
            err_sink,
            injection: Some(injection),
            scratch: [0; CHUNK_SIZE],
        })
    }

    /// Block on readiness and route until the child's output side closes.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Vec::with_capacity(epoll::MAX_EVENTS);
        loop {
            self.epoll.wait(&mut events)?;
            for index in 0..events.len() {
                match self.handle(events[index])? {
                    Disposition::Continue => {}
                    Disposition::Shutdown => return Ok(()),
                }
            }
        }
    }

    fn injection_fd(&self) -> RawFd {
        // new() always leaves an open channel behind; -1 can never collide
        // with a registered descriptor.
        self.injection.as_ref().map_or(-1, |file| file.as_raw_fd())
    }

    fn role_of(&self, fd: RawFd) -> Option<Role> {
        if fd == self.fds.real_stdin {
            Some(Role::RealStdin)
        } else if fd == self.injection_fd() {
            Some(Role::Injection)
        } else if fd == self.fds.child_stdout {
            Some(Role::ChildStdout)
        } else if self.fds.child_stderr == Some(fd) {
            Some(Role::ChildStderr)
        } else {
            None
        }
    }

    fn fd_of(&self, role: Role) -> RawFd {
        match role {
            Role::RealStdin => self.fds.real_stdin,
            Role::Injection => self.injection_fd(),
            Role::ChildStdout => self.fds.child_stdout,
            // role_of only yields ChildStderr when the fd exists.
            Role::ChildStderr => self.fds.child_stderr.unwrap_or(-1),
        }
    }

    /// Handle one readiness report according to the routing table.
    fn handle(&mut self, event: Event) -> Result<Disposition> {
        if event.unexpected() {
            bail!(
                "unexpected event flags {:#x} on fd {}",
                event.flags,
                event.fd
            );
        }
        let Some(role) = self.role_of(event.fd) else {
            bail!("readiness event on unregistered fd {}", event.fd);
        };

        let mut disconnected = event.hangup();
        if event.readable() {
            match read_chunk(event.fd, &mut self.scratch)? {
                ReadOutcome::Data(len) => self.forward(role, len)?,
                // Zero-length read alongside readable is the disconnect
                // signal, not an empty message.
                ReadOutcome::Disconnected => disconnected = true,
                ReadOutcome::WouldBlock => {}
            }
        }

        if !disconnected {
            return Ok(Disposition::Continue);
        }
        self.on_disconnect(role)
    }

    /// Forward one chunk from the scratch buffer to the role's
    /// destination(s), fully draining it before the next event.
    fn forward(&mut self, role: Role, len: usize) -> Result<()> {
        let chunk = &self.scratch[..len];
        match role {
            Role::RealStdin | Role::Injection => write_all(self.fds.child_input, chunk)
                .context("failed to forward input to the child"),
            Role::ChildStdout => {
                write_all(self.fds.real_stdout, chunk)
                    .context("failed to forward child output to stdout")?;
                write_all(self.out_sink, chunk)
                    .context("failed to mirror child output to the out file")
            }
            Role::ChildStderr => {
                write_all(self.fds.real_stderr, chunk)
                    .context("failed to forward child stderr to stderr")?;
                if let Some(sink) = self.err_sink {
                    write_all(sink, chunk)
                        .context("failed to mirror child stderr to the err file")?;
                }
                Ok(())
            }
        }
    }

    /// A peer closed its write side. Remaining buffered bytes are drained
    /// (still forwarded and mirrored) first, so neither the capture files
    /// nor the child ever lose a tail chunk.
    fn on_disconnect(&mut self, role: Role) -> Result<Disposition> {
        self.drain(role)?;
        match role {
            Role::ChildStdout | Role::ChildStderr => {
                info!(?role, "child output hung up, shutting down");
                Ok(Disposition::Shutdown)
            }
            Role::Injection => {
                self.reopen_injection()?;
                Ok(Disposition::Continue)
            }
            Role::RealStdin => bail!("standard input hung up while the bridge was running"),
        }
    }

    fn drain(&mut self, role: Role) -> Result<()> {
        let fd = self.fd_of(role);
        loop {
            match read_chunk(fd, &mut self.scratch)? {
                ReadOutcome::Data(len) => self.forward(role, len)?,
                ReadOutcome::Disconnected | ReadOutcome::WouldBlock => return Ok(()),
            }
        }
    }

    /// Close-and-reopen cycle that keeps the injection channel alive across
    /// writer disconnects. The old descriptor is deregistered and closed
    /// before the fresh one opens, so exactly one injection reader exists at
    /// any time; a writer arriving in the gap blocks in open() until the
    /// fresh reader attaches. A freshly opened FIFO reader does not report
    /// hang-up until a writer has attached and left again, so this cannot
    /// spin while no writer exists.
    fn reopen_injection(&mut self) -> Result<()> {
        let old_fd = self.injection_fd();
        self.epoll
            .deregister(old_fd)
            .context("failed to deregister the injection FIFO")?;
        // Taking the File out drops it, closing the old descriptor.
        self.injection = None;
        let fresh = self.capture.open_injection()?;
        self.epoll
            .register(fresh.as_raw_fd())
            .context("failed to register the reopened injection FIFO")?;
        self.injection = Some(fresh);
        debug!("injection FIFO reopened for the next writer");
        Ok(())
    }
}
