//! Engine implementation driving the `guestfish` command-line tool.
//!
//! Disk queries and overlay creation run as one-shot invocations. The live
//! session uses `guestfish --listen`: the listener process keeps the
//! appliance running while each operation is issued through
//! `guestfish --remote=<pid>`. Binary-safe device I/O goes through
//! `download-offset`/`upload-offset` with local scratch files, since raw
//! bytes cannot be passed on a command line.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::cancel::SessionCancel;
use crate::engine::{Engine, MountOutcome};
use crate::error::{Error, Result};

/// Check if `guestfish` is available on the system.
pub fn is_available() -> bool {
    Command::new("guestfish")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn require_guestfish() -> Result<()> {
    if !is_available() {
        return Err(Error::engine(
            "guestfish is required but not found; install it via your \
             distribution's libguestfs-tools / guestfish package",
        ));
    }
    Ok(())
}

/// Convert anything path- or string-like into a command argument.
fn arg(s: impl Into<OsString>) -> OsString {
    s.into()
}

/// Parse the `GUESTFISH_PID=<n>` line printed by `guestfish --listen`.
fn parse_listen_pid(stdout: &str) -> Option<i32> {
    let rest = stdout.split("GUESTFISH_PID=").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parse `list-filesystems` output: one `device: fstype` pair per line.
fn parse_filesystems(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(|dev| dev.trim().to_string())
        .filter(|dev| !dev.is_empty())
        .collect()
}

/// Parse one-name-per-line output (`vgs`).
fn parse_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Cancels the listener's blocking operation by interrupting it.
struct RemoteCancel {
    pid: AtomicI32,
}

impl SessionCancel for RemoteCancel {
    fn cancel(&self) {
        let pid = self.pid.load(Ordering::SeqCst);
        if pid > 0 {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGINT,
            );
        }
    }
}

/// A pending drive attach, replayed once the listener is up.
struct DriveSpec {
    path: OsString,
    format: String,
    cachemode: String,
}

/// [`Engine`] backed by the `guestfish` tool.
pub struct GuestfishEngine {
    pending_drives: Vec<DriveSpec>,
    remote_pid: Option<i32>,
    cancel: Arc<RemoteCancel>,
}

impl GuestfishEngine {
    /// Create the engine, verifying `guestfish` is installed.
    pub fn new() -> Result<Self> {
        require_guestfish()?;
        Ok(Self {
            pending_drives: Vec::new(),
            remote_pid: None,
            cancel: Arc::new(RemoteCancel {
                pid: AtomicI32::new(0),
            }),
        })
    }

    /// Run a one-shot `guestfish` invocation (no appliance session).
    fn oneshot(args: &[OsString]) -> Result<String> {
        let output = Command::new("guestfish")
            .arg("--")
            .args(args)
            .output()
            .map_err(|e| Error::engine(format!("failed to run guestfish: {e}")))?;
        Self::expect_success(args, output)
    }

    /// Issue a command to the live listener.
    fn remote(&self, args: &[OsString]) -> Result<Output> {
        let pid = self
            .remote_pid
            .ok_or_else(|| Error::engine("no live guestfish session"))?;
        tracing::trace!(command = ?args.first(), "guestfish remote call");
        Command::new("guestfish")
            .arg(format!("--remote={pid}"))
            .arg("--")
            .args(args)
            .output()
            .map_err(|e| Error::engine(format!("failed to run guestfish: {e}")))
    }

    /// Issue a command to the live listener, treating any failure as fatal.
    fn remote_ok(&self, args: &[OsString]) -> Result<String> {
        let output = self.remote(args)?;
        Self::expect_success(args, output)
    }

    fn expect_success(args: &[OsString], output: Output) -> Result<String> {
        if !output.status.success() {
            let command = args
                .first()
                .map(|a| a.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(Error::engine(format!(
                "guestfish {command} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Engine for GuestfishEngine {
    fn detect_format(&mut self, disk: &Path) -> Result<String> {
        let out = Self::oneshot(&[arg("disk-format"), arg(disk)])?;
        Ok(out.trim().to_string())
    }

    fn virtual_size(&mut self, disk: &Path) -> Result<u64> {
        let out = Self::oneshot(&[arg("disk-virtual-size"), arg(disk)])?;
        out.trim()
            .parse()
            .map_err(|_| Error::engine(format!("unexpected disk-virtual-size output: {out:?}")))
    }

    fn create_overlay(
        &mut self,
        overlay: &Path,
        backing: &Path,
        backing_format: Option<&str>,
    ) -> Result<()> {
        let mut backingfile = OsString::from("backingfile:");
        backingfile.push(backing.as_os_str());

        let mut args = vec![
            arg("disk-create"),
            arg(overlay),
            arg("qcow2"),
            arg("-1"),
            backingfile,
        ];
        if let Some(fmt) = backing_format {
            args.push(arg(format!("backingformat:{fmt}")));
        }
        Self::oneshot(&args)?;
        Ok(())
    }

    fn add_drive(&mut self, disk: &Path, format: &str, cachemode: &str) -> Result<()> {
        if self.remote_pid.is_some() {
            return Err(Error::engine("cannot add a drive to a launched session"));
        }
        self.pending_drives.push(DriveSpec {
            path: disk.as_os_str().to_owned(),
            format: format.to_string(),
            cachemode: cachemode.to_string(),
        });
        Ok(())
    }

    fn launch(&mut self) -> Result<()> {
        let output = Command::new("guestfish")
            .arg("--listen")
            .output()
            .map_err(|e| Error::engine(format!("failed to run guestfish: {e}")))?;
        if !output.status.success() {
            return Err(Error::engine(format!(
                "guestfish --listen failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pid = parse_listen_pid(&stdout)
            .ok_or_else(|| Error::engine(format!("no GUESTFISH_PID in output: {stdout:?}")))?;
        self.remote_pid = Some(pid);
        self.cancel.pid.store(pid, Ordering::SeqCst);
        tracing::debug!(pid, "guestfish listener started");

        for drive in std::mem::take(&mut self.pending_drives) {
            self.remote_ok(&[
                arg("add-drive"),
                arg(drive.path.clone()),
                arg(format!("format:{}", drive.format)),
                arg(format!("cachemode:{}", drive.cachemode)),
            ])?;
        }

        self.remote_ok(&[arg("run")])?;
        Ok(())
    }

    fn cancel_handle(&self) -> Arc<dyn SessionCancel> {
        self.cancel.clone()
    }

    fn list_filesystems(&mut self) -> Result<Vec<String>> {
        let out = self.remote_ok(&[arg("list-filesystems")])?;
        Ok(parse_filesystems(&out))
    }

    fn canonical_device_name(&mut self, device: &str) -> Result<String> {
        let out = self.remote_ok(&[arg("canonical-device-name"), arg(device)])?;
        Ok(out.trim().to_string())
    }

    fn list_volume_groups(&mut self) -> Result<Vec<String>> {
        let out = self.remote_ok(&[arg("vgs")])?;
        Ok(parse_names(&out))
    }

    fn mount(&mut self, device: &str, mountpoint: &str) -> Result<MountOutcome> {
        let output = self.remote(&[arg("mount"), arg(device), arg(mountpoint)])?;
        if output.status.success() {
            Ok(MountOutcome::Mounted)
        } else {
            Ok(MountOutcome::NotMountable)
        }
    }

    fn umount_all(&mut self) -> Result<()> {
        self.remote_ok(&[arg("umount-all")])?;
        Ok(())
    }

    fn zero_free_space(&mut self, mountpoint: &str) -> Result<()> {
        self.remote_ok(&[arg("zero-free-space"), arg(mountpoint)])?;
        Ok(())
    }

    fn zero_device(&mut self, device: &str) -> Result<()> {
        self.remote_ok(&[arg("zero-device"), arg(device)])?;
        Ok(())
    }

    fn pread_device(&mut self, device: &str, count: usize, offset: u64) -> Result<Vec<u8>> {
        let scratch = tempfile::NamedTempFile::new().map_err(Error::io_simple)?;
        self.remote_ok(&[
            arg("download-offset"),
            arg(device),
            arg(scratch.path()),
            arg(offset.to_string()),
            arg(count.to_string()),
        ])?;
        std::fs::read(scratch.path()).map_err(|e| Error::io(e, scratch.path()))
    }

    fn pwrite_device(&mut self, device: &str, content: &[u8], offset: u64) -> Result<usize> {
        let scratch = tempfile::NamedTempFile::new().map_err(Error::io_simple)?;
        std::fs::write(scratch.path(), content).map_err(|e| Error::io(e, scratch.path()))?;
        self.remote_ok(&[
            arg("upload-offset"),
            arg(scratch.path()),
            arg(device),
            arg(offset.to_string()),
        ])?;
        Ok(content.len())
    }

    fn lvcreate_free(&mut self, logvol: &str, volgroup: &str, percent: u32) -> Result<bool> {
        let output = self.remote(&[
            arg("lvcreate-free"),
            arg(logvol),
            arg(volgroup),
            arg(percent.to_string()),
        ])?;
        Ok(output.status.success())
    }

    fn lvremove(&mut self, device: &str) -> Result<()> {
        self.remote_ok(&[arg("lvremove"), arg(device)])?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.remote_ok(&[arg("sync")])?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.remote_pid.is_some() {
            self.remote_ok(&[arg("exit")])?;
            self.remote_pid = None;
            self.cancel.pid.store(0, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // If shutdown was skipped, make sure the listener does not outlive
        // the handle.
        if let Some(pid) = self.remote_pid.take() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid),
                nix::sys::signal::Signal::SIGTERM,
            );
            self.cancel.pid.store(0, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for GuestfishEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
