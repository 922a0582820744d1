//! Scratch-space estimation for the copy-on-write overlay.
//!
//! The overlay lives in the scratch directory and can in the worst case grow
//! to the source disk's full virtual size. `needed = virtual_size − free` is
//! therefore an overestimate: actual growth is bounded by how much of the
//! guest is genuinely written. The check only warns, confirms, or fails per
//! the selected policy; it never changes the run's behavior otherwise.

use std::io::BufRead;
use std::path::Path;

use crate::error::{Error, Result};

/// Policy for the scratch-directory space check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckTmpdir {
    /// Never check.
    Ignore,
    /// Print the warning and proceed.
    Continue,
    /// Print the warning, then block on operator confirmation.
    #[default]
    Warn,
    /// Print the warning and terminate the run with a distinct exit status.
    Fail,
}

/// Bytes the scratch directory may be short by, or 0 when it suffices.
pub fn needed_bytes(virtual_size: u64, free: u64) -> u64 {
    virtual_size.saturating_sub(free)
}

/// Free space in bytes on the filesystem holding `dir`.
pub fn free_space(dir: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(dir)
        .map_err(|errno| Error::io(std::io::Error::from_raw_os_error(errno as i32), dir))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// The temp-space guard: a policy plus the confirmation used by the `warn`
/// policy. The confirmation is injected so tests can script it; the default
/// blocks on a line from standard input.
pub struct TempSpaceGuard {
    mode: CheckTmpdir,
    confirm: Box<dyn FnMut() -> std::io::Result<()>>,
}

impl TempSpaceGuard {
    /// Guard with the given policy, confirming on standard input.
    pub fn new(mode: CheckTmpdir) -> Self {
        Self::with_confirm(mode, Box::new(wait_for_return))
    }

    /// Guard with an injected confirmation (used by tests).
    pub fn with_confirm(
        mode: CheckTmpdir,
        confirm: Box<dyn FnMut() -> std::io::Result<()>>,
    ) -> Self {
        Self { mode, confirm }
    }

    /// Check whether `tmpdir` may be too small to hold an overlay that could
    /// grow to `virtual_size` bytes, applying the policy.
    pub fn check(&mut self, tmpdir: &Path, virtual_size: u64) -> Result<()> {
        if self.mode == CheckTmpdir::Ignore {
            return Ok(());
        }

        let free = free_space(tmpdir)?;
        let needed = needed_bytes(virtual_size, free);
        if needed == 0 {
            return Ok(());
        }

        tracing::warn!(
            tmpdir = %tmpdir.display(),
            free,
            virtual_size,
            needed,
            "temporary directory may not have enough free space for the overlay"
        );

        match self.mode {
            CheckTmpdir::Ignore => unreachable!(),
            CheckTmpdir::Continue => Ok(()),
            CheckTmpdir::Warn => {
                eprintln!(
                    "The overlay may need up to {needed} more bytes of free space in {}.",
                    tmpdir.display()
                );
                eprintln!("Press RETURN to continue, or interrupt to quit.");
                (self.confirm)().map_err(Error::io_simple)?;
                Ok(())
            }
            CheckTmpdir::Fail => Err(Error::TempSpace { needed }),
        }
    }
}

/// Block until the operator sends a line on standard input.
fn wait_for_return() -> std::io::Result<()> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(())
}
