//! Orchestration of one hook invocation.

use std::collections::HashMap;

use oci_spec::runtime::Spec;

use crate::archive;
use crate::config::HookConfig;
use crate::directive::{self, ArchiveMethod};
use crate::error::Result;
use crate::resolve::UpperDirResolver;

/// Runs the archive pass for one stopped container.
///
/// Parses directives from the spec's annotations, then walks the declared
/// mounts in the order the runtime emitted them; each mount matching a
/// directive has its upper layer resolved and preserved, and is never
/// revisited. A directive whose mount point appears among no declared
/// mounts is silently skipped. Execution is strictly sequential and
/// fail-fast: the first resolution or execution error aborts the pass,
/// leaving any partial output in place.
///
/// # Errors
///
/// Returns the first fatal resolution or execution error.
pub fn run(spec: &Spec, config: &HookConfig) -> Result<()> {
    let empty = HashMap::new();
    let annotations = spec.annotations().as_ref().unwrap_or(&empty);
    let mut directives = directive::parse_directives(annotations);
    tracing::debug!(?directives, "parsed archive directives");

    let mounts = spec.mounts().as_deref().unwrap_or(&[]);
    let mut resolver = UpperDirResolver::new(config);
    for mount in mounts {
        let Some(directive) = directives.remove(mount.destination()) else {
            continue;
        };
        let upper_dir = resolver.upper_dir(mount, &directive)?;
        tracing::info!(
            name = %directive.name,
            upper_dir = %upper_dir.display(),
            archive_to = %directive.archive_to.display(),
            "archiving upper layer"
        );
        match directive.method {
            ArchiveMethod::Copy => archive::archive_copy(&upper_dir, &directive.archive_to)?,
            ArchiveMethod::TarGzip => {
                archive::archive_tar_gzip(&upper_dir, &directive.archive_to, directive.owner)?;
            }
        }
        if let Some(marker) = &directive.success_marker {
            archive::write_marker(marker)?;
        }
    }
    for directive in directives.values() {
        tracing::debug!(
            name = %directive.name,
            mount_point = %directive.mount_point.display(),
            "directive matched no declared mount"
        );
    }
    tracing::info!("archive pass complete");
    Ok(())
}
