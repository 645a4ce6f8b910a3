//! Session lifetime: attachment, fork/exec, raw terminal mode, then the
//! routing loop until the child's output side hangs up.

use crate::attach::{Attachment, ParentEnds};
use crate::bridge::{Bridge, EndpointFds};
use crate::capture::CaptureFs;
use crate::config::{AppConfig, AttachMode};
use crate::spawn::{build_argv, spawn_child};
use crate::term::{self, RawGuard};
use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One bridge instance. Owns the child pid, the bridge-side descriptors,
/// the capture filesystem handles and, in pty mode, the saved terminal
/// state (restored when the guard drops, on every exit path).
pub struct Session {
    child_pid: i32,
    capture: CaptureFs,
    ends: ParentEnds,
    _raw_guard: Option<RawGuard>,
}

impl Session {
    /// Set up the whole bridge: capture files, attachment, fork/exec, raw
    /// terminal mode. Raw mode is entered last so a setup failure never
    /// leaves the terminal half-configured.
    pub fn start(config: &AppConfig) -> Result<Self> {
        if config.attach == AttachMode::Pty {
            term::ensure_stdin_tty()?;
        }
        let argv = build_argv(&config.command)?;
        let capture = CaptureFs::create(&config.session_dir, config.attach)?;

        let attachment = match config.attach {
            AttachMode::Pty => Attachment::pty(term::stdout_winsize())?,
            AttachMode::Pipes => Attachment::pipes()?,
        };

        let child_pid = match spawn_child(&attachment, &argv) {
            Ok(pid) => pid,
            Err(err) => {
                attachment.close_all();
                return Err(err);
            }
        };
        debug!(child_pid, mode = ?config.attach, "child spawned");

        let mut ends = attachment.into_parent_ends();

        let raw_guard = match config.attach {
            AttachMode::Pty => match RawGuard::enter() {
                Ok(guard) => Some(guard),
                Err(err) => {
                    ends.close();
                    return Err(err);
                }
            },
            AttachMode::Pipes => None,
        };

        Ok(Self {
            child_pid,
            capture,
            ends,
            _raw_guard: raw_guard,
        })
    }

    /// Run the routing loop until the child's output side closes, then
    /// best-effort reap the child.
    pub fn run(&mut self) -> Result<()> {
        let fds = EndpointFds::standard(
            self.ends.child_input,
            self.ends.child_stdout,
            self.ends.child_stderr,
        );
        let mut bridge = Bridge::new(&self.capture, fds)?;
        info!(child_pid = self.child_pid, "bridge running");
        bridge.run()?;
        self.reap_child();
        Ok(())
    }

    /// The child may legitimately outlive its stdout, so this polls with
    /// WNOHANG for a short window and never blocks on a survivor.
    fn reap_child(&mut self) {
        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            let mut status = 0;
            // SAFETY: child_pid came from fork; WNOHANG only inspects state.
            let ret = unsafe { libc::waitpid(self.child_pid, &mut status, libc::WNOHANG) };
            if ret == self.child_pid {
                debug!(child_pid = self.child_pid, status, "child reaped");
                return;
            }
            if ret < 0 {
                warn!(
                    child_pid = self.child_pid,
                    err = %std::io::Error::last_os_error(),
                    "waitpid failed"
                );
                return;
            }
            if Instant::now() >= deadline {
                debug!(
                    child_pid = self.child_pid,
                    "child still running at shutdown"
                );
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ends.close();
    }
}
