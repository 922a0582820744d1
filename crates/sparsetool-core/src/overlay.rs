//! Copy-on-write overlay creation.
//!
//! The overlay is the only thing the run ever writes to. It is a qcow2 image
//! in the scratch directory whose backing reference is the source disk; the
//! source itself is never opened for writing. The overlay path is registered
//! for deletion-at-exit before the engine writes a single byte to it, so a
//! crash mid-creation still cleans up.

use std::path::{Path, PathBuf};

use crate::cancel::CleanupRegistry;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::names::NameSource;

/// The overlay's copy-on-write format, fixed regardless of the source and
/// destination formats.
pub const OVERLAY_FORMAT: &str = "qcow2";

/// A created overlay image.
#[derive(Debug, Clone)]
pub struct Overlay {
    path: PathBuf,
}

impl Overlay {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Create the overlay in `tmpdir`, backed by `source`.
///
/// `source_format` is the source's declared or detected format; it is passed
/// through as the backing format when known. Failure is fatal: the run must
/// abort before any guest-visible operation occurs.
pub fn create(
    engine: &mut dyn Engine,
    source: &Path,
    source_format: Option<&str>,
    tmpdir: &Path,
    cleanup: &CleanupRegistry,
    names: &mut dyn NameSource,
) -> Result<Overlay> {
    let filename = format!("sparsetool-{}.{}", names.random_chars(8), OVERLAY_FORMAT);
    let path = tmpdir.join(filename);

    // Registered before creation: if the engine dies halfway through
    // initializing the file, the partial overlay is still deleted at exit.
    cleanup.register(&path);

    tracing::info!(
        overlay = %path.display(),
        source = %source.display(),
        "creating copy-on-write overlay"
    );

    engine
        .create_overlay(&path, source, source_format)
        .map_err(|err| Error::overlay(format!("failed to create overlay: {err}")))?;

    Ok(Overlay { path })
}
