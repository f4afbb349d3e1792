//! Error types for the layerkeep hook.
//!
//! Directive-level validation problems are logged and contained by the
//! parser; everything represented here is fatal to the run and propagates
//! up to the single exit point in the CLI.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors raised during upper-layer resolution or archive execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A directory traversal failed.
    #[error("walk error under {path}: {source}")]
    Walk {
        /// Root of the traversal that failed.
        path: PathBuf,
        /// Underlying traversal error.
        source: walkdir::Error,
    },

    /// A declared mount has a type the hook cannot resolve.
    #[error("unsupported mount type {typ:?} for mount {destination}")]
    UnsupportedMountType {
        /// Declared mount type.
        typ: String,
        /// Mount destination inside the container.
        destination: PathBuf,
    },

    /// A bind-type mount carries no source to cross-reference.
    #[error("bind mount {destination} has no source")]
    MissingMountSource {
        /// Mount destination inside the container.
        destination: PathBuf,
    },

    /// No live mount-helper process serves the bind mount's source.
    #[error("no fuse mount record found for bind mount source {mount_source}")]
    FuseMountNotFound {
        /// Source path the bind mount exposes.
        mount_source: PathBuf,
    },

    /// The resolved mount options carry no `upperdir=` entry.
    #[error("cannot find upperdir for archive {name} in mount {destination}")]
    UpperDirNotFound {
        /// Name of the directive being resolved.
        name: String,
        /// Mount destination inside the container.
        destination: PathBuf,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HookError>;
