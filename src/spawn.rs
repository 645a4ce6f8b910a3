//! Child process launch across the fork/exec boundary.

use crate::attach::Attachment;
use anyhow::{Context, Result};
use std::ffi::CString;
use std::io;
use std::ptr;

/// Convert the target command into NUL-checked C strings for execvp.
pub fn build_argv(command: &[String]) -> Result<Vec<CString>> {
    let mut argv = Vec::with_capacity(command.len());
    for arg in command {
        argv.push(
            CString::new(arg.as_str())
                .with_context(|| format!("command argument contains NUL byte: {arg}"))?,
        );
    }
    Ok(argv)
}

/// Fork and exec the target command attached through `attachment`.
///
/// Returns the child pid in the parent. The child branch never returns to
/// bridging logic: it either becomes the target program or `_exit(1)`s.
/// The caller still owns every attachment descriptor on error.
pub fn spawn_child(attachment: &Attachment, argv: &[CString]) -> Result<i32> {
    use crate::attach::errno_error;

    // SAFETY: fork happens before any bridge thread exists; the child branch
    // only runs async-signal-safe code before exec.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(errno_error("fork failed"));
    }
    if pid == 0 {
        // SAFETY: this is the child branch right after fork.
        unsafe { child_exec(attachment, argv) }
    }
    Ok(pid)
}

/// Child branch after fork: become a session leader, wire the standard
/// streams, acquire the controlling terminal in pty mode, exec the target.
///
/// # Safety
///
/// Must only be called in the child process right after `fork()`. Never
/// returns: it replaces the process image via `execvp` or `_exit(1)`s,
/// reporting the failure on fd 2 first.
unsafe fn child_exec(attachment: &Attachment, argv: &[CString]) -> ! {
    let fail = |context: &str| -> ! {
        let err = io::Error::last_os_error();
        let msg = format!("ttybridge child: {context} failed: {err}\n");
        // SAFETY: write is async-signal-safe and fd 2 is open in the child.
        let _ = libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr() as *const libc::c_void,
            msg.len(),
        );
        libc::_exit(1);
    };

    if libc::setsid() == -1 {
        fail("setsid");
    }

    match attachment {
        Attachment::Pty { master, slave } => {
            // A fresh session leader has no controlling terminal; the pty
            // slave must be claimed explicitly.
            if libc::ioctl(*slave, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
                fail("ioctl(TIOCSCTTY)");
            }
            if libc::dup2(*slave, libc::STDIN_FILENO) < 0
                || libc::dup2(*slave, libc::STDOUT_FILENO) < 0
                || libc::dup2(*slave, libc::STDERR_FILENO) < 0
            {
                fail("dup2");
            }
            libc::close(*master);
            libc::close(*slave);
        }
        Attachment::Pipes {
            stdin,
            stdout,
            stderr,
        } => {
            if libc::dup2(stdin.read, libc::STDIN_FILENO) < 0
                || libc::dup2(stdout.write, libc::STDOUT_FILENO) < 0
                || libc::dup2(stderr.write, libc::STDERR_FILENO) < 0
            {
                fail("dup2");
            }
            for fd in [
                stdin.read,
                stdin.write,
                stdout.read,
                stdout.write,
                stderr.read,
                stderr.write,
            ] {
                libc::close(fd);
            }
        }
    }

    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(ptr::null());

    libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
    fail("execvp");
}
