//! Sparsetool Core Library
//!
//! This crate makes virtual machine disk images smaller by producing a new,
//! sparse copy of a disk without ever mutating the original. The main entry
//! point is the [`sparsify`] function which runs the full pipeline.
//!
//! # Overview
//!
//! The source disk is protected behind a copy-on-write overlay. An
//! introspection engine is launched against the overlay to discover storage
//! structures inside it: mountable filesystems get their free space filled
//! with zeroes, swap devices are cleared while their header metadata is
//! preserved, and LVM volume groups have their free extents zeroed through
//! a disposable logical volume. Finally an external converter turns the
//! overlay into the output image, materializing the zeroed regions as holes.
//!
//! # Modules
//!
//! - [`error`] - Error types and Result alias
//! - [`engine`] - The narrow trait over the disk introspection engine
//! - [`guestfish`] - Production engine driving the `guestfish` tool
//! - [`tempspace`] - Scratch-space estimation and check policies
//! - [`overlay`] - Copy-on-write overlay creation
//! - [`session`] - The live engine session over the overlay
//! - [`sweep`] - Free-space zeroing across filesystems and swap
//! - [`volgroup`] - Free-extent reclamation in volume groups
//! - [`convert`] - Final conversion to the sparse output
//! - [`cancel`] - Interrupt handling and temp-file cleanup
//! - [`run`] - Orchestrator coordinating the full pipeline
//! - [`names`] - Random naming for disposable resources
//!
//! # Quick Start
//!
//! ```no_run
//! use sparsetool_core::{sparsify, CancellationController, SparsifyOptions};
//! use sparsetool_core::guestfish::GuestfishEngine;
//!
//! let controller = CancellationController::new();
//! let engine = Box::new(GuestfishEngine::new().unwrap());
//! let opts = SparsifyOptions::new("/vms/guest.img", "/vms/guest-sparse.img");
//! sparsify(engine, &opts, &controller).unwrap();
//! ```

pub mod cancel;
pub mod convert;
pub mod engine;
pub mod error;
pub mod guestfish;
pub mod names;
pub mod overlay;
pub mod run;
pub mod session;
pub mod sweep;
pub mod tempspace;
pub mod volgroup;

pub use error::{Error, Result};

// Re-export the main run functionality for convenience
pub use cancel::{CancelAction, CancellationController, CleanupRegistry, SessionCancel};
pub use convert::{Converter, QemuImgConverter};
pub use engine::{Engine, MountOutcome};
pub use names::{NameSource, RandomNames};
pub use run::{sparsify, sparsify_with, SparsifyOptions};
pub use tempspace::{CheckTmpdir, TempSpaceGuard};
