//! The narrow interface over the disk introspection engine.
//!
//! Everything the sparsification run needs from the engine goes through the
//! [`Engine`] trait: disk queries before a session exists, the session
//! lifecycle (drive attach, launch, shutdown, close), and the operations
//! issued against devices visible inside the session. The production
//! implementation lives in [`crate::guestfish`]; tests substitute a scripted
//! engine.

use std::path::Path;
use std::sync::Arc;

use crate::cancel::SessionCancel;
use crate::error::Result;

/// Outcome of a mount attempt.
///
/// Mount refusal is an expected result, not an error: many listed
/// filesystems are raw swap, LVM physical volumes, or content the engine
/// does not recognize. Callers branch on this value instead of catching a
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// The filesystem is mounted at the requested mountpoint.
    Mounted,
    /// The engine refused to mount the device.
    NotMountable,
}

/// Operations the sparsification run requires from the introspection engine.
///
/// Methods returning `Result` report only transport or engine failures;
/// expected negative results (an unmountable device, a volume group with no
/// free extents) are encoded in the return value.
pub trait Engine {
    /// Detect the format of a disk image. Returns `"unknown"` when the
    /// engine cannot tell.
    fn detect_format(&mut self, disk: &Path) -> Result<String>;

    /// Query the virtual (guest-visible) size of a disk image in bytes.
    fn virtual_size(&mut self, disk: &Path) -> Result<u64>;

    /// Create a copy-on-write image at `overlay` backed by `backing`.
    ///
    /// `backing_format` is passed through when the caller knows the backing
    /// disk's format; `None` lets the engine probe it.
    fn create_overlay(
        &mut self,
        overlay: &Path,
        backing: &Path,
        backing_format: Option<&str>,
    ) -> Result<()>;

    /// Attach a disk to the (not yet launched) session, read-write, with the
    /// given format and cache mode.
    fn add_drive(&mut self, disk: &Path, format: &str, cachemode: &str) -> Result<()>;

    /// Launch the engine appliance. Fatal on failure.
    fn launch(&mut self) -> Result<()>;

    /// Handle for cancelling the session's current blocking operation from
    /// another thread (the interrupt handler).
    fn cancel_handle(&self) -> Arc<dyn SessionCancel>;

    /// Enumerate filesystem devices found inside the attached disks, in the
    /// engine's own order.
    fn list_filesystems(&mut self) -> Result<Vec<String>>;

    /// Resolve a device name to its canonical form. A device may have
    /// several aliases; canonical names are what ignore-list matching uses.
    fn canonical_device_name(&mut self, device: &str) -> Result<String>;

    /// Enumerate LVM volume group names, in the engine's own order.
    fn list_volume_groups(&mut self) -> Result<Vec<String>>;

    /// Attempt to mount a filesystem.
    fn mount(&mut self, device: &str, mountpoint: &str) -> Result<MountOutcome>;

    /// Unmount everything currently mounted in the session.
    fn umount_all(&mut self) -> Result<()>;

    /// Fill the free space of a mounted filesystem with zeroes.
    fn zero_free_space(&mut self, mountpoint: &str) -> Result<()>;

    /// Zero an entire device.
    fn zero_device(&mut self, device: &str) -> Result<()>;

    /// Read `count` bytes from a device at `offset`.
    fn pread_device(&mut self, device: &str, count: usize, offset: u64) -> Result<Vec<u8>>;

    /// Write bytes to a device at `offset`, returning the number of bytes
    /// actually written.
    fn pwrite_device(&mut self, device: &str, content: &[u8], offset: u64) -> Result<usize>;

    /// Create a logical volume consuming `percent` of the free extents of a
    /// volume group. Returns `false` when the group has nothing to give
    /// (commonly: no free extents), which is not an error.
    fn lvcreate_free(&mut self, logvol: &str, volgroup: &str, percent: u32) -> Result<bool>;

    /// Remove a logical volume, returning its extents to the free pool.
    fn lvremove(&mut self, device: &str) -> Result<()>;

    /// Force written data to be durable inside the session.
    fn sync(&mut self) -> Result<()>;

    /// Shut down the appliance, releasing its handle on the attached disks.
    /// Must be called before the overlay is handed to the converter.
    fn shutdown(&mut self) -> Result<()>;

    /// Release the engine handle. Idempotent after [`Engine::shutdown`].
    fn close(&mut self) -> Result<()>;
}
