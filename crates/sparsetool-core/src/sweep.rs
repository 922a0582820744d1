//! Free-space zeroing across discovered filesystems.
//!
//! Each filesystem the session can see goes down one of four branches.
//! Ignored entries are skipped. Explicitly requested devices are zeroed
//! whole. Everything else is mounted and has its free space zeroed, the
//! general format-agnostic path; when the mount is refused, the sweep
//! probes for a Linux swap signature and does a header-preserving
//! whole-device zero instead. Anything still unrecognized is left
//! untouched, which is not an error.

use std::collections::HashSet;

use crate::engine::MountOutcome;
use crate::error::{Error, Result};
use crate::session::DiskSession;

/// Signature identifying a Linux x86 swap partition.
pub const SWAP_SIGNATURE: &[u8; 10] = b"SWAPSPACE2";

/// Offset of the signature within the first block. This is `4096 − 10`,
/// tied to a 4 KiB page size: swap formatted on architectures with larger
/// pages is not detected here and the device is left unmodified.
pub const SWAP_SIGNATURE_OFFSET: u64 = 4086;

/// Size of the swap header that must survive a whole-device zero. It holds
/// the label, UUID and version metadata.
pub const SWAP_HEADER_SIZE: usize = 4096;

/// Where filesystems are mounted for free-space zeroing, inside the
/// session's own namespace.
const SCRATCH_MOUNTPOINT: &str = "/";

/// Whether a signature read matches Linux swap.
pub fn is_swap_signature(bytes: &[u8]) -> bool {
    bytes == SWAP_SIGNATURE
}

/// Zero the unused space of every non-ignored filesystem in the session.
///
/// `ignore` entries are matched by canonical device identity; `zero` entries
/// by the device identifier as reported by the engine. Processing order is
/// canonical-sorted, so repeated runs over an unchanged disk are
/// reproducible.
pub fn sweep_filesystems(
    session: &mut DiskSession,
    ignore: &[String],
    zero: &[String],
) -> Result<()> {
    let mut ignored = HashSet::new();
    for device in ignore {
        ignored.insert(session.canonicalize(device)?);
    }
    let zeroes: HashSet<&str> = zero.iter().map(String::as_str).collect();

    for fs in session.filesystems()? {
        if ignored.contains(&fs.canonical) {
            tracing::debug!(device = %fs.device, "ignored, leaving untouched");
            continue;
        }

        if zeroes.contains(fs.device.as_str()) {
            tracing::info!(device = %fs.device, "zeroing whole device as requested");
            session.zero_device(&fs.device)?;
        } else {
            match session.mount(&fs.device, SCRATCH_MOUNTPOINT)? {
                MountOutcome::Mounted => {
                    tracing::info!(device = %fs.device, "filling free space with zero");
                    session.zero_free_space(SCRATCH_MOUNTPOINT)?;
                }
                MountOutcome::NotMountable => {
                    try_zero_swap(session, &fs.device)?;
                }
            }
        }

        // Guarantee nothing stays mounted into the next iteration.
        session.umount_all()?;
    }

    Ok(())
}

/// Probe an unmountable device for a swap signature; if found, zero the
/// device while preserving its 4096-byte header.
///
/// Swap has no free-space concept visible to a filesystem mount, so the
/// whole device is zeroed and the header written back afterwards. A short
/// header write would corrupt the swap label/UUID/version and aborts the
/// run.
fn try_zero_swap(session: &mut DiskSession, device: &str) -> Result<()> {
    let signature = session.pread_device(device, SWAP_SIGNATURE.len(), SWAP_SIGNATURE_OFFSET)?;
    if !is_swap_signature(&signature) {
        tracing::debug!(device, "not mountable and not swap, leaving untouched");
        return Ok(());
    }

    tracing::info!(device, "clearing swap while preserving its header");
    let header = session.pread_device(device, SWAP_HEADER_SIZE, 0)?;
    session.zero_device(device)?;
    let written = session.pwrite_device(device, &header, 0)?;
    if written != SWAP_HEADER_SIZE {
        return Err(Error::SwapRestore {
            device: device.to_string(),
            expected: SWAP_HEADER_SIZE,
            written,
        });
    }
    Ok(())
}
