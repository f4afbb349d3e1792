//! Cross-referencing live fuse mount-helper processes.
//!
//! Unprivileged containers expose their overlay mounts to the runtime as
//! plain bind mounts while the real fuse-backed overlay lives elsewhere.
//! The actual mount options can only be recovered from the live command
//! line of the helper process serving the mount.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sysinfo::System;

/// Mount options recovered from one helper process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuseMountRecord {
    /// Mount point the helper serves (its trailing positional argument).
    pub mount_point: PathBuf,
    /// Comma-split tokens of the helper's `-o` argument.
    pub options: Vec<String>,
}

/// Extracts the mount record from a helper command line.
///
/// Token heuristic tied to fuse-overlayfs argument conventions: a token
/// beginning with `-` names the pending option, the following bare token
/// is that option's value, and a bare token with no option pending is the
/// mount point. Best effort only; a helper invoked with an exotic flag
/// ordering is not recovered.
pub fn parse_helper_argv<S: AsRef<str>>(argv: &[S]) -> Option<FuseMountRecord> {
    let mut pending: Option<&str> = None;
    let mut options: Vec<String> = Vec::new();
    let mut mount_point: Option<PathBuf> = None;
    for token in argv.iter().skip(1) {
        let token = token.as_ref();
        if token.starts_with('-') {
            pending = Some(token);
        } else if let Some(option) = pending.take() {
            if option == "-o" {
                options.extend(token.split(',').map(str::to_owned));
            }
        } else {
            mount_point = Some(PathBuf::from(token));
        }
    }
    mount_point.map(|mount_point| FuseMountRecord {
        mount_point,
        options,
    })
}

/// Scans the process table for live instances of `mount_program` and
/// returns their mount options keyed by mount point.
///
/// One record per matching process; a later process serving the same
/// mount point replaces the earlier one. The table is built at most once
/// per hook invocation and discarded with the run.
pub fn scan_mount_options(mount_program: &Path) -> HashMap<PathBuf, Vec<String>> {
    let system = System::new_all();
    let mut table = HashMap::new();
    for (pid, process) in system.processes() {
        if process.exe() != Some(mount_program) {
            continue;
        }
        let argv: Vec<String> = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let Some(record) = parse_helper_argv(&argv) else {
            tracing::warn!(pid = %pid, "could not parse mount helper command line");
            continue;
        };
        tracing::debug!(
            pid = %pid,
            mount_point = %record.mount_point.display(),
            "found fuse mount record"
        );
        let _ = table.insert(record.mount_point, record.options);
    }
    table
}
