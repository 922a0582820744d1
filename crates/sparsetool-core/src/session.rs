//! The live introspection session over the overlay.
//!
//! [`DiskSession`] owns the engine for the duration of a launch. The overlay
//! is attached read-write with a cache mode that favors scratch-file write
//! performance over durability, since the overlay is disposable. Enumeration
//! results are sorted so repeated runs over an unchanged disk perform the
//! same operations in the same order.

use std::sync::Arc;

use crate::cancel::SessionCancel;
use crate::engine::{Engine, MountOutcome};
use crate::error::Result;
use crate::overlay::{Overlay, OVERLAY_FORMAT};

/// Cache mode for the attached overlay. The overlay never needs to survive a
/// host crash, so the fastest mode is the right one.
const OVERLAY_CACHEMODE: &str = "unsafe";

/// A filesystem discovered inside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemEntry {
    /// Device identifier as reported by the engine.
    pub device: String,
    /// Canonical identifier, used for ignore-list matching.
    pub canonical: String,
}

/// An LVM volume group discovered inside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    pub name: String,
}

/// A launched engine session bound to the overlay.
pub struct DiskSession {
    engine: Box<dyn Engine>,
}

impl DiskSession {
    /// Attach the overlay and launch the appliance. Launch failure is fatal.
    pub fn launch(mut engine: Box<dyn Engine>, overlay: &Overlay) -> Result<Self> {
        engine.add_drive(overlay.path(), OVERLAY_FORMAT, OVERLAY_CACHEMODE)?;
        tracing::info!("launching introspection engine");
        engine.launch()?;
        Ok(Self { engine })
    }

    /// Handle for cancelling the session's current blocking operation.
    pub fn cancel_handle(&self) -> Arc<dyn SessionCancel> {
        self.engine.cancel_handle()
    }

    /// Mountable-or-not filesystem entries, sorted by canonical identifier.
    pub fn filesystems(&mut self) -> Result<Vec<FilesystemEntry>> {
        let devices = self.engine.list_filesystems()?;
        let mut entries = Vec::with_capacity(devices.len());
        for device in devices {
            let canonical = self.engine.canonical_device_name(&device)?;
            entries.push(FilesystemEntry { device, canonical });
        }
        entries.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        Ok(entries)
    }

    /// Volume groups, sorted by name.
    pub fn volume_groups(&mut self) -> Result<Vec<VolumeGroup>> {
        let mut names = self.engine.list_volume_groups()?;
        names.sort();
        Ok(names.into_iter().map(|name| VolumeGroup { name }).collect())
    }

    /// Canonical form of a device name.
    pub fn canonicalize(&mut self, device: &str) -> Result<String> {
        self.engine.canonical_device_name(device)
    }

    pub fn mount(&mut self, device: &str, mountpoint: &str) -> Result<MountOutcome> {
        self.engine.mount(device, mountpoint)
    }

    pub fn umount_all(&mut self) -> Result<()> {
        self.engine.umount_all()
    }

    pub fn zero_free_space(&mut self, mountpoint: &str) -> Result<()> {
        self.engine.zero_free_space(mountpoint)
    }

    pub fn zero_device(&mut self, device: &str) -> Result<()> {
        self.engine.zero_device(device)
    }

    pub fn pread_device(&mut self, device: &str, count: usize, offset: u64) -> Result<Vec<u8>> {
        self.engine.pread_device(device, count, offset)
    }

    pub fn pwrite_device(&mut self, device: &str, content: &[u8], offset: u64) -> Result<usize> {
        self.engine.pwrite_device(device, content, offset)
    }

    pub fn lvcreate_free(&mut self, logvol: &str, volgroup: &str, percent: u32) -> Result<bool> {
        self.engine.lvcreate_free(logvol, volgroup, percent)
    }

    pub fn lvremove(&mut self, device: &str) -> Result<()> {
        self.engine.lvremove(device)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.engine.sync()
    }

    /// Shut down the appliance and release the engine handle. The engine
    /// must let go of the overlay file before the converter reads it.
    pub fn shutdown(mut self) -> Result<()> {
        tracing::info!("shutting down introspection engine");
        self.engine.shutdown()?;
        self.engine.close()
    }
}
