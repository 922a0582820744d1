//! Run orchestrator for the sparsification pipeline.
//!
//! This module coordinates the full run:
//! 1. Pre-flight validation (input format, output format, option conflicts)
//! 2. Scratch-space check per the selected policy
//! 3. Copy-on-write overlay creation over the read-only source
//! 4. Engine session launch against the overlay
//! 5. Free-space zeroing across filesystems, then volume groups
//! 6. Session shutdown, then conversion to the final sparse output
//!
//! Phases run strictly in order and data flows forward only: every mutating
//! operation targets the overlay or volumes derived from it, never the
//! source. The cancellation controller's action is reassigned at each phase
//! boundary so an interrupt always performs the minimal correct cleanup.

use std::path::PathBuf;

use crate::cancel::{CancelAction, CancellationController};
use crate::convert::{self, Converter, QemuImgConverter};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::names::{NameSource, RandomNames};
use crate::overlay;
use crate::session::DiskSession;
use crate::sweep::sweep_filesystems;
use crate::tempspace::{CheckTmpdir, TempSpaceGuard};
use crate::volgroup::reclaim_volume_groups;

/// Options for a sparsification run.
#[derive(Debug, Clone)]
pub struct SparsifyOptions {
    /// Path to the source disk image. Never opened for writing.
    pub input: PathBuf,
    /// Path for the sparse output image.
    pub output: PathBuf,
    /// Explicit input format, overriding autodetection.
    pub format: Option<String>,
    /// Explicit output format, overriding the input format.
    pub convert: Option<String>,
    /// Ask the converter to compress the output.
    pub compress: bool,
    /// Opaque format-specific option string, forwarded verbatim to the
    /// converter.
    pub option: Option<String>,
    /// Devices and volume groups to leave untouched.
    pub ignore: Vec<String>,
    /// Devices to zero whole, without mounting.
    pub zero: Vec<String>,
    /// Scratch-space check policy.
    pub check_tmpdir: CheckTmpdir,
    /// Scratch directory for the overlay. Defaults to the system temp dir.
    pub tmpdir: Option<PathBuf>,
}

impl SparsifyOptions {
    /// Options for sparsifying `input` into `output` with defaults
    /// everywhere else.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            format: None,
            convert: None,
            compress: false,
            option: None,
            ignore: Vec::new(),
            zero: Vec::new(),
            check_tmpdir: CheckTmpdir::default(),
            tmpdir: None,
        }
    }
}

/// Sparsify a disk image.
///
/// This is the main entry point. The source disk behind `opts.input` is
/// guaranteed untouched on every path, success or failure; all mutation
/// happens in a disposable overlay that is deleted on exit.
pub fn sparsify(
    engine: Box<dyn Engine>,
    opts: &SparsifyOptions,
    controller: &CancellationController,
) -> Result<()> {
    let mut names = RandomNames;
    let mut guard = TempSpaceGuard::new(opts.check_tmpdir);
    let mut converter = QemuImgConverter;
    sparsify_with(engine, opts, controller, &mut names, &mut guard, &mut converter)
}

/// [`sparsify`] with injected name generation, temp-space confirmation and
/// converter, for tests and embedders.
pub fn sparsify_with(
    mut engine: Box<dyn Engine>,
    opts: &SparsifyOptions,
    controller: &CancellationController,
    names: &mut dyn NameSource,
    guard: &mut TempSpaceGuard,
    converter: &mut dyn Converter,
) -> Result<()> {
    // Phase 1: pre-flight validation, before any resource is committed.
    std::fs::metadata(&opts.input).map_err(|e| Error::io(e, &opts.input))?;

    let input_format = match &opts.format {
        Some(fmt) => fmt.clone(),
        None => {
            let detected = engine.detect_format(&opts.input)?;
            if detected == "unknown" {
                return Err(Error::format(
                    "could not detect the format of the source disk image; \
                     use the --format option to specify it",
                ));
            }
            detected
        }
    };
    let output_format = convert::resolve_output_format(
        opts.convert.as_deref(),
        opts.format.as_deref(),
        &input_format,
    )?;
    convert::check_preflight(&output_format, opts.compress)?;

    // Phase 2: scratch-space check.
    let virtual_size = engine.virtual_size(&opts.input)?;
    let tmpdir = opts.tmpdir.clone().unwrap_or_else(std::env::temp_dir);
    guard.check(&tmpdir, virtual_size)?;

    // Phase 3: overlay. Its deletion-at-exit is registered before the
    // engine writes any content.
    let overlay = overlay::create(
        engine.as_mut(),
        &opts.input,
        Some(&input_format),
        &tmpdir,
        &controller.cleanup(),
        names,
    )?;

    // Phase 4: launch the session against the overlay. From here until
    // shutdown, an interrupt must cancel the engine's blocking operation
    // before exiting.
    let mut session = DiskSession::launch(engine, &overlay)?;
    controller.set_action(CancelAction::CancelSession(session.cancel_handle()));

    // Phase 5: fill free space of mountable filesystems with zero; clear
    // swap devices while preserving their headers.
    sweep_filesystems(&mut session, &opts.ignore, &opts.zero)?;

    // Phase 6: reclaim free extents in volume groups.
    reclaim_volume_groups(&mut session, &opts.ignore, names)?;

    // Phase 7: the engine must release the overlay before the converter
    // reads it.
    session.shutdown()?;
    controller.set_action(CancelAction::Exit);

    // Phase 8: materialize sparseness in the output.
    converter.convert(
        overlay.path(),
        &opts.output,
        &output_format,
        opts.compress,
        opts.option.as_deref(),
    )?;

    tracing::info!(output = %opts.output.display(), "sparsify completed");
    Ok(())
}
