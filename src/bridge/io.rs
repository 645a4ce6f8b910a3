//! Low-level read/write helpers for the routing core.

use anyhow::{anyhow, Result};
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

/// Outcome of one chunk read on a ready descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes landed at the front of the scratch buffer.
    Data(usize),
    /// Zero-length read: the peer closed its write side. Never forwarded
    /// as payload.
    Disconnected,
    /// Nothing buffered right now (non-blocking descriptor).
    WouldBlock,
}

/// Read one chunk, retrying transparently on signal interruption. A short
/// read is valid and reported as-is.
pub fn read_chunk(fd: RawFd, buf: &mut [u8]) -> Result<ReadOutcome> {
    loop {
        // SAFETY: buf is a valid writable buffer of buf.len() bytes.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            return Ok(ReadOutcome::Data(n as usize));
        }
        if n == 0 {
            return Ok(ReadOutcome::Disconnected);
        }
        let err = io::Error::last_os_error();
        // A pty master reads EIO once the slave side is gone; that is the
        // hang-up, not an I/O failure.
        if err.raw_os_error() == Some(libc::EIO) {
            return Ok(ReadOutcome::Disconnected);
        }
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
            _ => return Err(anyhow!("read on fd {fd} failed: {err}")),
        }
    }
}

/// Write the whole buffer, retrying until every byte of the chunk has
/// drained. No byte of a forwarded chunk may be dropped; a hard error or a
/// zero-byte write is fatal.
pub fn write_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        // SAFETY: data points at data.len() readable bytes.
        let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            return Err(anyhow!("write to fd {fd} failed: {err}"));
        }
        if written == 0 {
            return Err(anyhow!("write to fd {fd} returned 0"));
        }
        data = &data[written as usize..];
    }
    Ok(())
}
