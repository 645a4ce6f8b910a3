//! Attachment factory: the descriptor pairs connecting the bridge to the
//! child process, created before fork.

use anyhow::{anyhow, Result};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

/// Format an OS error with additional context.
pub(crate) fn errno_error(context: &str) -> anyhow::Error {
    anyhow!("{context}: {}", io::Error::last_os_error())
}

/// Close a file descriptor while ignoring errors. `-1` is a no-op.
pub(crate) fn close_fd(fd: RawFd) {
    if fd >= 0 {
        // SAFETY: fd is either a descriptor we own or -1, which is skipped.
        let _ = unsafe { libc::close(fd) };
    }
}

/// One unidirectional pipe.
#[derive(Clone, Copy, Debug)]
pub struct PipePair {
    pub read: RawFd,
    pub write: RawFd,
}

impl PipePair {
    fn open() -> Result<Self> {
        let mut fds = [0; 2];
        // SAFETY: pipe writes two descriptors into the array.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(errno_error("pipe failed"));
        }
        Ok(Self {
            read: fds[0],
            write: fds[1],
        })
    }

    fn close_both(&self) {
        close_fd(self.read);
        close_fd(self.write);
    }
}

/// Channels connecting the bridge to the child, selected at construction.
pub enum Attachment {
    /// One pseudo-terminal pair; the master carries all three child streams.
    Pty { master: RawFd, slave: RawFd },
    /// Three independent pipe pairs with separate stdout and stderr.
    Pipes {
        stdin: PipePair,
        stdout: PipePair,
        stderr: PipePair,
    },
}

impl Attachment {
    /// Allocate a pty pair sized like the invoking terminal.
    pub fn pty(mut winsize: libc::winsize) -> Result<Self> {
        let mut master: RawFd = -1;
        let mut slave: RawFd = -1;
        // SAFETY: openpty expects valid pointers for master/slave/winsize;
        // we pass stack locals.
        if unsafe {
            libc::openpty(
                &mut master,
                &mut slave,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut winsize,
            )
        } != 0
        {
            return Err(errno_error("openpty failed"));
        }
        Ok(Attachment::Pty { master, slave })
    }

    /// Allocate the three pipe pairs for the pipes variant.
    pub fn pipes() -> Result<Self> {
        let stdin = PipePair::open()?;
        let stdout = match PipePair::open() {
            Ok(pair) => pair,
            Err(err) => {
                stdin.close_both();
                return Err(err);
            }
        };
        let stderr = match PipePair::open() {
            Ok(pair) => pair,
            Err(err) => {
                stdin.close_both();
                stdout.close_both();
                return Err(err);
            }
        };
        Ok(Attachment::Pipes {
            stdin,
            stdout,
            stderr,
        })
    }

    /// Close every descriptor of the attachment. Used when fork fails
    /// before any end has been handed over.
    pub fn close_all(&self) {
        match self {
            Attachment::Pty { master, slave } => {
                close_fd(*master);
                close_fd(*slave);
            }
            Attachment::Pipes {
                stdin,
                stdout,
                stderr,
            } => {
                stdin.close_both();
                stdout.close_both();
                stderr.close_both();
            }
        }
    }

    /// Close the ends owned by the child and keep the bridge-side ones.
    /// A leaked child-side write end would keep the matching read side from
    /// ever reporting end-of-stream.
    pub fn into_parent_ends(self) -> ParentEnds {
        match self {
            Attachment::Pty { master, slave } => {
                close_fd(slave);
                ParentEnds {
                    child_input: master,
                    child_stdout: master,
                    child_stderr: None,
                }
            }
            Attachment::Pipes {
                stdin,
                stdout,
                stderr,
            } => {
                close_fd(stdin.read);
                close_fd(stdout.write);
                close_fd(stderr.write);
                ParentEnds {
                    child_input: stdin.write,
                    child_stdout: stdout.read,
                    child_stderr: Some(stderr.read),
                }
            }
        }
    }
}

/// Bridge-side descriptors that remain once the child-owned ends are closed.
/// In pty mode `child_input` and `child_stdout` are the same master fd, the
/// single bidirectional endpoint of the attachment.
pub struct ParentEnds {
    pub child_input: RawFd,
    pub child_stdout: RawFd,
    /// Present only in the pipes variant; a pty cannot distinguish stderr.
    pub child_stderr: Option<RawFd>,
}

impl ParentEnds {
    /// Close the bridge-side descriptors. The pty master backs both
    /// `child_input` and `child_stdout`, so it is only closed once.
    pub fn close(&mut self) {
        if self.child_input != self.child_stdout {
            close_fd(self.child_input);
        }
        close_fd(self.child_stdout);
        if let Some(fd) = self.child_stderr.take() {
            close_fd(fd);
        }
        self.child_input = -1;
        self.child_stdout = -1;
    }
}
