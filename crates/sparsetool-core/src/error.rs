//! Error types for the sparsetool core library.

use std::path::PathBuf;

/// The main error type for sparsetool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Scratch directory too small under the `fail` check-tmpdir policy.
    #[error("temporary directory may need up to {needed} bytes more free space (--check-tmpdir=fail)")]
    TempSpace { needed: u64 },

    /// Error creating or initializing the copy-on-write overlay.
    #[error("overlay error: {message}")]
    Overlay { message: String },

    /// Fatal failure reported by the disk introspection engine.
    #[error("engine error: {message}")]
    Engine { message: String },

    /// Short write while restoring a swap header; a partial restore would
    /// corrupt the swap label/UUID/version.
    #[error("integrity error on {device}: swap header restore wrote {written} of {expected} bytes")]
    SwapRestore {
        device: String,
        expected: usize,
        written: usize,
    },

    /// Pre-flight validation failure (format resolution, option conflicts).
    #[error("{message}")]
    Format { message: String },

    /// The external conversion tool failed.
    #[error("conversion error: {message}")]
    Convert { message: String },
}

/// A specialized Result type for sparsetool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Process exit status for a temp-space failure under the `fail` policy.
pub const EXIT_TEMP_SPACE: i32 = 2;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an overlay error.
    pub fn overlay(message: impl Into<String>) -> Self {
        Self::Overlay {
            message: message.into(),
        }
    }

    /// Create an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Create a pre-flight validation error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create a conversion error.
    pub fn convert(message: impl Into<String>) -> Self {
        Self::Convert {
            message: message.into(),
        }
    }

    /// Process exit status for this error: 2 for a temp-space check failure
    /// under the `fail` policy, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TempSpace { .. } => EXIT_TEMP_SPACE,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io(io_err, "/var/tmp/overlay.qcow2");
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(msg.contains("/var/tmp/overlay.qcow2"));
    }

    #[test]
    fn test_io_error_without_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::io_simple(io_err);
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(!msg.contains("at '"));
    }

    #[test]
    fn test_temp_space_exit_code() {
        let err = Error::TempSpace { needed: 4096 };
        assert_eq!(err.exit_code(), EXIT_TEMP_SPACE);
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_generic_exit_code() {
        assert_eq!(Error::engine("launch failed").exit_code(), 1);
        assert_eq!(Error::convert("qemu-img exited 1").exit_code(), 1);
        assert_eq!(Error::format("unknown format").exit_code(), 1);
    }

    #[test]
    fn test_swap_restore_error() {
        let err = Error::SwapRestore {
            device: "/dev/sda2".to_string(),
            expected: 4096,
            written: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/sda2"));
        assert!(msg.contains("512 of 4096"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io { path: None, .. }));
    }
}
