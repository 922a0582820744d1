//! Shared scripted engine, converter and name source for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sparsetool_core::cancel::{CleanupRegistry, SessionCancel};
use sparsetool_core::engine::{Engine, MountOutcome};
use sparsetool_core::error::Result;
use sparsetool_core::names::NameSource;
use sparsetool_core::overlay;
use sparsetool_core::session::DiskSession;
use sparsetool_core::Converter;

/// Observable state shared between a test and the engine it scripted.
#[derive(Default)]
pub struct MockState {
    /// Every operation issued, in order, one line each.
    pub ops: Vec<String>,
    /// Device contents, mutated by zero/write operations.
    pub devices: HashMap<String, Vec<u8>>,
    /// Set when the cancel handle fires.
    pub cancelled: bool,
}

struct MockCancel {
    state: Arc<Mutex<MockState>>,
}

impl SessionCancel for MockCancel {
    fn cancel(&self) {
        self.state.lock().unwrap().cancelled = true;
    }
}

/// A scripted [`Engine`] recording every call.
pub struct MockEngine {
    pub state: Arc<Mutex<MockState>>,
    filesystems: Vec<String>,
    mountable: HashSet<String>,
    canonical: HashMap<String, String>,
    volume_groups: Vec<String>,
    free_extents: HashMap<String, u64>,
    detected_format: String,
    virtual_size: u64,
    pwrite_result: Option<usize>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            filesystems: Vec::new(),
            mountable: HashSet::new(),
            canonical: HashMap::new(),
            volume_groups: Vec::new(),
            free_extents: HashMap::new(),
            detected_format: "raw".to_string(),
            virtual_size: 1024,
            pwrite_result: None,
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.detected_format = format.to_string();
        self
    }

    pub fn with_virtual_size(mut self, size: u64) -> Self {
        self.virtual_size = size;
        self
    }

    /// Add a filesystem entry, in listing order.
    pub fn with_filesystem(mut self, device: &str, mountable: bool) -> Self {
        self.filesystems.push(device.to_string());
        if mountable {
            self.mountable.insert(device.to_string());
        }
        self
    }

    pub fn with_device_content(mut self, device: &str, content: Vec<u8>) -> Self {
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(device.to_string(), content);
        self
    }

    /// Make `alias` canonicalize to `canonical`.
    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.canonical
            .insert(alias.to_string(), canonical.to_string());
        self
    }

    pub fn with_volume_group(mut self, name: &str, free_extent_bytes: u64) -> Self {
        self.volume_groups.push(name.to_string());
        self.free_extents
            .insert(name.to_string(), free_extent_bytes);
        self
    }

    /// Force pwrite to report this many bytes written.
    pub fn with_pwrite_result(mut self, written: usize) -> Self {
        self.pwrite_result = Some(written);
        self
    }

    fn record(&self, op: String) {
        self.state.lock().unwrap().ops.push(op);
    }
}

impl Engine for MockEngine {
    fn detect_format(&mut self, disk: &Path) -> Result<String> {
        self.record(format!("disk-format {}", disk.display()));
        Ok(self.detected_format.clone())
    }

    fn virtual_size(&mut self, disk: &Path) -> Result<u64> {
        self.record(format!("disk-virtual-size {}", disk.display()));
        Ok(self.virtual_size)
    }

    fn create_overlay(
        &mut self,
        overlay: &Path,
        backing: &Path,
        backing_format: Option<&str>,
    ) -> Result<()> {
        self.record(format!(
            "disk-create {} backing={} backingformat={}",
            overlay.display(),
            backing.display(),
            backing_format.unwrap_or("-")
        ));
        Ok(())
    }

    fn add_drive(&mut self, disk: &Path, format: &str, cachemode: &str) -> Result<()> {
        self.record(format!(
            "add-drive {} format={format} cachemode={cachemode}",
            disk.display()
        ));
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        self.record("launch".to_string());
        Ok(())
    }

    fn cancel_handle(&self) -> Arc<dyn SessionCancel> {
        Arc::new(MockCancel {
            state: Arc::clone(&self.state),
        })
    }

    fn list_filesystems(&mut self) -> Result<Vec<String>> {
        self.record("list-filesystems".to_string());
        Ok(self.filesystems.clone())
    }

    fn canonical_device_name(&mut self, device: &str) -> Result<String> {
        Ok(self
            .canonical
            .get(device)
            .cloned()
            .unwrap_or_else(|| device.to_string()))
    }

    fn list_volume_groups(&mut self) -> Result<Vec<String>> {
        self.record("vgs".to_string());
        Ok(self.volume_groups.clone())
    }

    fn mount(&mut self, device: &str, _mountpoint: &str) -> Result<MountOutcome> {
        self.record(format!("mount {device}"));
        if self.mountable.contains(device) {
            Ok(MountOutcome::Mounted)
        } else {
            Ok(MountOutcome::NotMountable)
        }
    }

    fn umount_all(&mut self) -> Result<()> {
        self.record("umount-all".to_string());
        Ok(())
    }

    fn zero_free_space(&mut self, mountpoint: &str) -> Result<()> {
        self.record(format!("zero-free-space {mountpoint}"));
        Ok(())
    }

    fn zero_device(&mut self, device: &str) -> Result<()> {
        self.record(format!("zero-device {device}"));
        if let Some(content) = self.state.lock().unwrap().devices.get_mut(device) {
            content.fill(0);
        }
        Ok(())
    }

    fn pread_device(&mut self, device: &str, count: usize, offset: u64) -> Result<Vec<u8>> {
        self.record(format!("pread {device} {count} {offset}"));
        let state = self.state.lock().unwrap();
        let content = state.devices.get(device).cloned().unwrap_or_default();
        let mut out = vec![0u8; count];
        let start = (offset as usize).min(content.len());
        let end = (start + count).min(content.len());
        out[..end - start].copy_from_slice(&content[start..end]);
        Ok(out)
    }

    fn pwrite_device(&mut self, device: &str, content: &[u8], offset: u64) -> Result<usize> {
        self.record(format!("pwrite {device} {} {offset}", content.len()));
        let mut state = self.state.lock().unwrap();
        let dev = state.devices.entry(device.to_string()).or_default();
        let end = offset as usize + content.len();
        if dev.len() < end {
            dev.resize(end, 0);
        }
        dev[offset as usize..end].copy_from_slice(content);
        Ok(self.pwrite_result.unwrap_or(content.len()))
    }

    fn lvcreate_free(&mut self, logvol: &str, volgroup: &str, percent: u32) -> Result<bool> {
        self.record(format!("lvcreate-free {logvol} {volgroup} {percent}"));
        let free = self.free_extents.get(volgroup).copied().unwrap_or(0);
        if free == 0 {
            return Ok(false);
        }
        // The new LV covers the free extents; give it nonzero content so
        // zeroing is observable.
        self.state
            .lock()
            .unwrap()
            .devices
            .insert(format!("/dev/{volgroup}/{logvol}"), vec![0xAB; 64]);
        Ok(true)
    }

    fn lvremove(&mut self, device: &str) -> Result<()> {
        self.record(format!("lvremove {device}"));
        self.state.lock().unwrap().devices.remove(device);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.record("sync".to_string());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.record("shutdown".to_string());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.record("close".to_string());
        Ok(())
    }
}

/// A scripted converter recording each invocation.
#[derive(Default)]
pub struct MockConverter {
    pub calls: Vec<String>,
}

impl Converter for MockConverter {
    fn convert(
        &mut self,
        overlay: &Path,
        output: &Path,
        output_format: &str,
        compress: bool,
        option: Option<&str>,
    ) -> Result<()> {
        self.calls.push(format!(
            "convert {} -> {} format={output_format} compress={compress} option={}",
            overlay.display(),
            output.display(),
            option.unwrap_or("-")
        ));
        Ok(())
    }
}

/// Deterministic name source: "aaaaaaaa", "aaaaaaab", ...
#[derive(Default)]
pub struct SequentialNames {
    next: u32,
}

impl NameSource for SequentialNames {
    fn random_chars(&mut self, len: usize) -> String {
        let mut n = self.next;
        self.next += 1;
        let mut chars = vec![b'a'; len];
        let mut i = len;
        while n > 0 && i > 0 {
            i -= 1;
            chars[i] = b'a' + (n % 26) as u8;
            n /= 26;
        }
        String::from_utf8(chars).unwrap()
    }
}

/// Build an overlay and a launched session around a scripted engine.
pub fn launch_session(engine: MockEngine) -> (DiskSession, Arc<Mutex<MockState>>) {
    let state = Arc::clone(&engine.state);
    let registry = CleanupRegistry::new();
    let mut names = SequentialNames::default();
    let mut boxed: Box<dyn Engine> = Box::new(engine);
    let ov = overlay::create(
        boxed.as_mut(),
        Path::new("/source.img"),
        Some("raw"),
        &std::env::temp_dir(),
        &registry,
        &mut names,
    )
    .unwrap();
    let session = DiskSession::launch(boxed, &ov).unwrap();
    (session, state)
}

/// Recorded operation lines for a state handle.
pub fn ops(state: &Arc<Mutex<MockState>>) -> Vec<String> {
    state.lock().unwrap().ops.clone()
}

/// Device content snapshot for a state handle.
pub fn device(state: &Arc<Mutex<MockState>>, name: &str) -> Option<Vec<u8>> {
    state.lock().unwrap().devices.get(name).cloned()
}

/// Index of the first op equal to or starting with `needle`.
pub fn op_index(ops: &[String], needle: &str) -> Option<usize> {
    ops.iter().position(|op| op.starts_with(needle))
}

/// A PathBuf that is never created on disk, for overlay/output paths.
pub fn fake_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}
