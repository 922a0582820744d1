//! Sparsetool CLI - make a virtual machine disk image smaller.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use sparsetool_core::guestfish::GuestfishEngine;
use sparsetool_core::{sparsify, CancellationController, CheckTmpdir, SparsifyOptions};
use tracing_subscriber::EnvFilter;

/// Produce a sparse copy of a virtual machine disk image, reclaiming the
/// guest's unused space. The input disk is never modified.
#[derive(Parser)]
#[command(name = "sparsetool")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the source disk image.
    indisk: PathBuf,

    /// Path for the sparse output image.
    outdisk: PathBuf,

    /// Format of the input disk, overriding autodetection.
    #[arg(long)]
    format: Option<String>,

    /// Output format. Defaults to the input format.
    #[arg(long)]
    convert: Option<String>,

    /// Compress the output (not supported for raw output).
    #[arg(long)]
    compress: bool,

    /// Format-specific output options, passed through to the converter.
    #[arg(short = 'o', long)]
    option: Option<String>,

    /// Device or volume group to leave untouched. May be repeated.
    #[arg(long, value_name = "DEVICE")]
    ignore: Vec<String>,

    /// Device to zero whole, without mounting. May be repeated.
    #[arg(long, value_name = "DEVICE")]
    zero: Vec<String>,

    /// Policy for the scratch-space check.
    #[arg(long, value_enum, default_value = "warn")]
    check_tmpdir: CheckTmpdirArg,

    /// Scratch directory for the overlay. Defaults to the system temp dir.
    #[arg(long)]
    tmpdir: Option<PathBuf>,

    /// Machine-friendly output: no spinner, plain diagnostics.
    #[arg(long)]
    machine_readable: bool,

    /// Print only warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug output.
    #[arg(short, long)]
    verbose: bool,
}

/// Scratch-space check policy argument mapping.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CheckTmpdirArg {
    /// Never check.
    Ignore,
    /// Warn and proceed.
    Continue,
    /// Warn, then wait for confirmation.
    Warn,
    /// Warn and exit with status 2.
    Fail,
}

impl From<CheckTmpdirArg> for CheckTmpdir {
    fn from(arg: CheckTmpdirArg) -> Self {
        match arg {
            CheckTmpdirArg::Ignore => CheckTmpdir::Ignore,
            CheckTmpdirArg::Continue => CheckTmpdir::Continue,
            CheckTmpdirArg::Warn => CheckTmpdir::Warn,
            CheckTmpdirArg::Fail => CheckTmpdir::Fail,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(cli) {
        eprintln!("sparsetool: {err:#}");
        let code = err
            .downcast_ref::<sparsetool_core::Error>()
            .map(sparsetool_core::Error::exit_code)
            .unwrap_or(1);
        process::exit(code);
    }
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let controller = CancellationController::new();
    controller
        .install_signal_handler()
        .context("installing interrupt handler")?;

    let engine = Box::new(GuestfishEngine::new()?);

    let opts = SparsifyOptions {
        input: cli.indisk,
        output: cli.outdisk,
        format: cli.format,
        convert: cli.convert,
        compress: cli.compress,
        option: cli.option,
        ignore: cli.ignore,
        zero: cli.zero,
        check_tmpdir: cli.check_tmpdir.into(),
        tmpdir: cli.tmpdir,
    };

    // The core emits its progress as log events; the spinner just shows the
    // run is alive during long engine operations.
    let spinner = if cli.quiet || cli.machine_readable {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner());
        pb.set_message("sparsifying...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    };

    let result = sparsify(engine, &opts, &controller);

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    result?;

    if !cli.quiet {
        println!("Sparsify operation completed with no errors.");
        println!("Before deleting the old disk, carefully check that the output disk boots and works correctly.");
    }
    Ok(())
}
