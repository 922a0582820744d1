//! Interrupt handling and deferred temp-file cleanup.
//!
//! The run keeps exactly one cleanup action live at a time and swaps it at
//! each phase boundary. Before the session is launched and after it is shut
//! down, an interrupt simply exits (temp files were registered for deletion
//! the moment they were named). While the session is live, an interrupt must
//! first ask the engine to cancel its current blocking operation; tearing
//! the appliance down without cancelling risks leaving its subprocess in an
//! inconsistent state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Cancels the engine session's current blocking operation.
///
/// Implementations must be callable from the interrupt-handler thread while
/// the main thread is blocked inside an engine call.
pub trait SessionCancel: Send + Sync {
    fn cancel(&self);
}

/// What an interrupt should do right now.
#[derive(Clone)]
pub enum CancelAction {
    /// Exit immediately. Registered temp files are deleted on the way out.
    Exit,
    /// Ask the live session to cancel its blocking operation, then exit.
    CancelSession(Arc<dyn SessionCancel>),
}

/// Temp files to delete on any exit: normal, error, or interrupt.
///
/// Paths are registered before any content is written to them, so a crash
/// mid-creation still cleans up. Cloning shares the underlying list.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path for deletion at exit.
    pub fn register(&self, path: impl Into<PathBuf>) {
        self.paths.lock().unwrap().push(path.into());
    }

    /// Paths currently registered.
    pub fn registered(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }

    /// Delete every registered file and clear the registry. Files that no
    /// longer exist are skipped silently.
    pub fn remove_all(&self) {
        let mut paths = self.paths.lock().unwrap();
        for path in paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed temporary file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "could not remove temporary file")
                }
            }
        }
    }
}

/// Owner of the current interrupt action.
///
/// The orchestrator swaps the action at phase boundaries with
/// [`CancellationController::set_action`]. The OS signal hook is installed
/// separately so tests can construct a controller and drive it directly.
pub struct CancellationController {
    action: Arc<Mutex<CancelAction>>,
    cleanup: CleanupRegistry,
}

impl CancellationController {
    /// Create a controller whose initial action is [`CancelAction::Exit`].
    pub fn new() -> Self {
        Self {
            action: Arc::new(Mutex::new(CancelAction::Exit)),
            cleanup: CleanupRegistry::new(),
        }
    }

    /// The shared temp-file registry drained on every exit path.
    pub fn cleanup(&self) -> CleanupRegistry {
        self.cleanup.clone()
    }

    /// Replace the current interrupt action.
    pub fn set_action(&self, action: CancelAction) {
        *self.action.lock().unwrap() = action;
    }

    /// Install the SIGINT hook. On interrupt the current action runs, the
    /// cleanup registry is drained, and the process exits with status 1.
    pub fn install_signal_handler(&self) -> Result<()> {
        let action = Arc::clone(&self.action);
        let cleanup = self.cleanup.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("interrupted, cleaning up");
            if let CancelAction::CancelSession(handle) = &*action.lock().unwrap() {
                handle.cancel();
            }
            cleanup.remove_all();
            std::process::exit(1);
        })
        .map_err(|e| {
            Error::io_simple(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("failed to install interrupt handler: {e}"),
            ))
        })
    }

    /// Whether a path is still registered for cleanup.
    pub fn is_registered(&self, path: &Path) -> bool {
        self.cleanup.registered().iter().any(|p| p == path)
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationController {
    fn drop(&mut self) {
        // Normal and error exits both land here; the signal path drains the
        // registry itself before exiting.
        self.cleanup.remove_all();
    }
}
