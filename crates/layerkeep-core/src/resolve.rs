//! Upper-layer resolution for declared mounts.
//!
//! Privileged containers mount overlays directly, so the writable layer
//! is named in the declared mount options. Unprivileged containers go
//! through a fuse mount helper and declare only a bind mount; the real
//! options are recovered by cross-referencing the helper's live processes.

use std::collections::HashMap;
use std::path::PathBuf;

use oci_spec::runtime::Mount;

use crate::config::HookConfig;
use crate::directive::ArchiveDirective;
use crate::error::{HookError, Result};
use crate::fuse;

/// Mount option prefix naming the writable layer.
pub const UPPER_DIR_PREFIX: &str = "upperdir=";

const MOUNT_TYPE_OVERLAY: &str = "overlay";
const MOUNT_TYPE_BIND: &str = "bind";

/// Resolves the on-disk upper directory for declared mounts.
///
/// The fuse process table is scanned lazily, at most once per run, and
/// only when a bind-indirected mount actually needs it.
#[derive(Debug)]
pub struct UpperDirResolver<'a> {
    config: &'a HookConfig,
    fuse_table: Option<HashMap<PathBuf, Vec<String>>>,
}

impl<'a> UpperDirResolver<'a> {
    /// Creates a resolver with an empty memo.
    pub const fn new(config: &'a HookConfig) -> Self {
        Self {
            config,
            fuse_table: None,
        }
    }

    /// Returns the upper directory backing `mount`.
    ///
    /// # Errors
    ///
    /// Returns an error for mount types other than `overlay` and `bind`,
    /// for bind mounts with no source or no live fuse record, and for
    /// option lists carrying no `upperdir=` entry. All of these abort the
    /// run: proceeding would silently skip a requested backup.
    pub fn upper_dir(&mut self, mount: &Mount, directive: &ArchiveDirective) -> Result<PathBuf> {
        let typ = mount.typ().as_deref().unwrap_or("");
        let options = match typ {
            MOUNT_TYPE_OVERLAY => mount.options().clone().unwrap_or_default(),
            MOUNT_TYPE_BIND => self.bind_options(mount)?,
            other => {
                return Err(HookError::UnsupportedMountType {
                    typ: other.to_owned(),
                    destination: mount.destination().clone(),
                });
            }
        };
        options
            .iter()
            .find_map(|option| option.strip_prefix(UPPER_DIR_PREFIX))
            .map(PathBuf::from)
            .ok_or_else(|| HookError::UpperDirNotFound {
                name: directive.name.clone(),
                destination: mount.destination().clone(),
            })
    }

    /// Looks up a bind mount's source in the memoized fuse table.
    fn bind_options(&mut self, mount: &Mount) -> Result<Vec<String>> {
        let Some(source) = mount.source() else {
            return Err(HookError::MissingMountSource {
                destination: mount.destination().clone(),
            });
        };
        let table = self
            .fuse_table
            .get_or_insert_with(|| fuse::scan_mount_options(&self.config.mount_program));
        table
            .get(source)
            .cloned()
            .ok_or_else(|| HookError::FuseMountNotFound {
                mount_source: source.clone(),
            })
    }
}
