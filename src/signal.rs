//! Ctrl-C handling.
//!
//! The player shares our process group, so Ctrl-C reaches it too and it
//! exits on its own. We only need to remember that the exit was the user's
//! doing, so the handler just raises a flag the playback loop consumes.
//!
//! Code that blocks outside the player (HTTP retries, connectivity waits)
//! calls [`check`] around its sleeps and bails out with [`Interrupted`].

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// The user pressed Ctrl-C while the session was blocked.
#[derive(Debug, Error)]
#[error("interrupted by user")]
pub struct Interrupted;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    interrupt();
}

/// Raise the flag as Ctrl-C would.
pub fn interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler for the rest of the process lifetime.
pub fn install() -> Result<()> {
    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only touches an atomic, which is async-signal-safe.
    let previous = unsafe { libc::signal(libc::SIGINT, handler) };
    if previous == libc::SIG_ERR {
        bail!("Failed to install SIGINT handler: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

/// Whether an interrupt arrived since the last call. Clears the flag.
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// Whether an interrupt is pending, without clearing it.
pub fn pending() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Fail with [`Interrupted`] if an interrupt is pending. The flag stays set
/// for the selection loop to consume.
pub fn check() -> Result<()> {
    if pending() {
        return Err(Interrupted.into());
    }
    Ok(())
}

pub fn is_interrupted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Interrupted>().is_some()
}
