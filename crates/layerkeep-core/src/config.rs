//! Immutable run configuration for one hook invocation.

use std::path::PathBuf;

/// Default path of the fuse mount helper whose live processes are
/// inspected to resolve bind-indirected overlay mounts.
pub const DEFAULT_MOUNT_PROGRAM: &str = "/usr/bin/fuse-overlayfs";

/// Configuration assembled once at start-up from command-line flags and
/// passed into the orchestrator. Never mutated afterwards.
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Executable path of the fuse mount helper.
    pub mount_program: PathBuf,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            mount_program: PathBuf::from(DEFAULT_MOUNT_PROGRAM),
        }
    }
}
