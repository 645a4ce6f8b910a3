//! Persisted capture files and the reopenable injection FIFO under the
//! session directory.

use crate::attach::errno_error;
use crate::config::AttachMode;
use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

const SESSION_FILE_MODE: u32 = 0o700;

/// Files under the session directory: `out` (plus `err` in pipes mode)
/// mirror the child's output streams; `in` is the FIFO external writers
/// inject input through.
pub struct CaptureFs {
    in_path: PathBuf,
    pub out_file: File,
    pub err_file: Option<File>,
}

impl CaptureFs {
    /// Create the session directory, the truncated capture file(s) and a
    /// fresh FIFO, removing any stale FIFO left by a previous run.
    pub fn create(session_dir: &Path, mode: AttachMode) -> Result<Self> {
        fs::create_dir_all(session_dir).with_context(|| {
            format!(
                "failed to create session directory {}",
                session_dir.display()
            )
        })?;

        let out_file = open_capture_file(&session_dir.join("out"))?;
        let err_file = match mode {
            AttachMode::Pipes => Some(open_capture_file(&session_dir.join("err"))?),
            AttachMode::Pty => None,
        };

        let in_path = session_dir.join("in");
        remove_stale_fifo(&in_path)?;
        mkfifo(&in_path)?;

        Ok(Self {
            in_path,
            out_file,
            err_file,
        })
    }

    /// Open (or reopen) the read side of the injection FIFO, non-blocking.
    ///
    /// This is the sole reattachment mechanism: the routing core calls it
    /// again every time the current writer hangs up, at any point after
    /// setup, without disturbing any other endpoint. If the FIFO path has
    /// gone missing in the meantime it is recreated first.
    pub fn open_injection(&self) -> Result<File> {
        if !self.in_path.exists() {
            mkfifo(&self.in_path)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.in_path)
            .with_context(|| {
                format!("failed to open injection FIFO {}", self.in_path.display())
            })?;
        debug!(path = %self.in_path.display(), "injection FIFO open");
        Ok(file)
    }

    pub fn in_path(&self) -> &Path {
        &self.in_path
    }
}

fn open_capture_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SESSION_FILE_MODE)
        .open(path)
        .with_context(|| format!("failed to create capture file {}", path.display()))
}

fn remove_stale_fifo(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove stale FIFO {}", path.display()))
        }
    }
}

fn mkfifo(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("FIFO path contains NUL byte: {}", path.display()))?;
    // SAFETY: c_path is a valid NUL-terminated path.
    if unsafe { libc::mkfifo(c_path.as_ptr(), SESSION_FILE_MODE as libc::mode_t) } != 0 {
        return Err(errno_error("mkfifo failed"));
    }
    Ok(())
}
