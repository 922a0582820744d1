//! Final conversion of the overlay into the sparse output image.
//!
//! Materializing sparseness in the output format is the job of the external
//! `qemu-img` tool. This module resolves the output
//! format, validates option combinations before any resource is committed,
//! and runs the conversion as a subprocess. Only the exit code is checked;
//! the tool's messages are not parsed.

use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};
use crate::overlay::OVERLAY_FORMAT;

/// Check if `qemu-img` is available on the system.
pub fn is_available() -> bool {
    Command::new("qemu-img")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn require_qemu_img() -> Result<()> {
    if !is_available() {
        return Err(Error::convert(
            "qemu-img is required but not found; install it via your \
             distribution's qemu-utils / qemu-img package",
        ));
    }
    Ok(())
}

/// Resolve the output format by priority: explicit conversion-format
/// override, then explicit input-format override, then the format
/// autodetected from the source disk.
///
/// Autodetection yielding `"unknown"` is fatal: the operator must supply
/// the format explicitly.
pub fn resolve_output_format(
    convert: Option<&str>,
    format: Option<&str>,
    detected: &str,
) -> Result<String> {
    if let Some(fmt) = convert {
        return Ok(fmt.to_string());
    }
    if let Some(fmt) = format {
        return Ok(fmt.to_string());
    }
    if detected == "unknown" {
        return Err(Error::format(
            "could not detect the format of the source disk image; \
             use the --format option to specify it",
        ));
    }
    Ok(detected.to_string())
}

/// Reject option combinations the external tool cannot honor. Runs before
/// any overlay or session resource is created.
pub fn check_preflight(output_format: &str, compress: bool) -> Result<()> {
    if compress && output_format == "raw" {
        return Err(Error::format(
            "--compress cannot be used with raw format output",
        ));
    }
    Ok(())
}

/// The conversion tool behind a narrow interface, so tests can substitute
/// a scripted converter.
pub trait Converter {
    /// Convert the overlay into the sparse output image.
    fn convert(
        &mut self,
        overlay: &Path,
        output: &Path,
        output_format: &str,
        compress: bool,
        option: Option<&str>,
    ) -> Result<()>;
}

/// Production converter invoking `qemu-img convert`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QemuImgConverter;

impl Converter for QemuImgConverter {
    fn convert(
        &mut self,
        overlay: &Path,
        output: &Path,
        output_format: &str,
        compress: bool,
        option: Option<&str>,
    ) -> Result<()> {
        run_convert(overlay, output, output_format, compress, option)
    }
}

/// Run `qemu-img convert` to materialize the sparse output.
///
/// The source format is always the overlay's copy-on-write format. `option`
/// is an opaque format-specific string forwarded verbatim. A non-zero exit
/// status is fatal and the failing command line is echoed for diagnosis.
pub fn run_convert(
    overlay: &Path,
    output: &Path,
    output_format: &str,
    compress: bool,
    option: Option<&str>,
) -> Result<()> {
    require_qemu_img()?;

    let mut cmd = Command::new("qemu-img");
    cmd.args(["convert", "-f", OVERLAY_FORMAT]);
    if compress {
        cmd.arg("-c");
    }
    if let Some(opt) = option {
        cmd.arg("-o").arg(opt);
    }
    cmd.arg("-O").arg(output_format).arg(overlay).arg(output);

    tracing::info!(
        overlay = %overlay.display(),
        output = %output.display(),
        format = output_format,
        compress,
        "converting overlay to sparse output"
    );

    let result = cmd
        .output()
        .map_err(|e| Error::convert(format!("failed to run qemu-img: {e}")))?;

    if !result.status.success() {
        return Err(Error::convert(format!(
            "command failed with {}: {:?}: {}",
            result.status,
            cmd,
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }

    Ok(())
}
