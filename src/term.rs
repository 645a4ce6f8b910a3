//! Terminal state control for the pty attachment mode.

use anyhow::{bail, Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size as terminal_size};
use std::io::{self, Write};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static RAW_MODE_ENABLED: AtomicBool = AtomicBool::new(false);
static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

/// RAII guard that puts the invoking terminal into raw mode and restores the
/// saved attributes on drop (and on panic via a shared hook).
pub struct RawGuard;

impl RawGuard {
    /// Capture the current terminal attributes and switch to raw mode:
    /// canonical mode, echo, signal generation and I/O translation all off.
    /// The bridge cannot run against a half-configured terminal, so failure
    /// is fatal.
    pub fn enter() -> Result<Self> {
        install_restore_panic_hook();
        enable_raw_mode().context("failed to put the terminal into raw mode")?;
        RAW_MODE_ENABLED.store(true, Ordering::SeqCst);
        Ok(RawGuard)
    }
}

impl Drop for RawGuard {
    fn drop(&mut self) {
        restore_terminal();
    }
}

/// Reapply the saved terminal attributes, flushing pending output first.
/// Safe to call more than once; only the first call after raw-mode entry
/// does anything.
pub fn restore_terminal() {
    if RAW_MODE_ENABLED.swap(false, Ordering::SeqCst) {
        let _ = io::stdout().flush();
        let _ = disable_raw_mode();
    }
}

/// Restore the terminal before the default panic output scribbles over a
/// raw-mode screen.
pub fn install_restore_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            restore_terminal();
            previous(info);
        }));
    });
}

/// The pty attachment needs a real terminal on the invoking side.
pub fn ensure_stdin_tty() -> Result<()> {
    // SAFETY: isatty only inspects the descriptor.
    if unsafe { libc::isatty(libc::STDIN_FILENO) } != 1 {
        bail!("standard input is not a terminal; pty attachment needs one (try --attach pipes)");
    }
    Ok(())
}

/// Window size of the invoking terminal, applied to the new pty so the
/// child sees a correctly sized terminal from the start.
pub fn stdout_winsize() -> libc::winsize {
    let (cols, rows) = terminal_size().unwrap_or((80, 24));
    libc::winsize {
        ws_row: rows.max(1),
        ws_col: cols.max(1),
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}
