//! Archive directives parsed from container annotations.
//!
//! Annotations under the reserved prefix are grouped by directive name,
//! validated, and re-keyed by mount point. Validation problems drop the
//! offending directive with a warning; they never abort the run.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use thiserror::Error;

/// Reserved annotation namespace consumed by this hook.
///
/// Keys have the form `<prefix><name>.<argument>` where `name` groups the
/// arguments of one directive.
pub const ANNOTATION_PREFIX: &str = "org.layerkeep.archive-overlay.";

const ARG_MOUNT_POINT: &str = "mount-point";
const ARG_ARCHIVE_TO: &str = "archive-to";
const ARG_SUCCESS: &str = "success";
const ARG_METHOD: &str = "method";
const ARG_TAR_CONTENT_OWNER: &str = "tar-content-owner";

/// How an upper layer is preserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveMethod {
    /// Recursive copy into a destination directory.
    #[default]
    Copy,
    /// Single gzip-compressed tar stream with normalized headers.
    TarGzip,
}

impl ArchiveMethod {
    /// Maps the annotation value to a method; any other value is invalid.
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "copy" => Some(Self::Copy),
            "tar-gzip" => Some(Self::TarGzip),
            _ => None,
        }
    }
}

/// Numeric ownership forced onto every entry of a tar archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentOwner {
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id.
    pub gid: u32,
}

/// Error parsing a `tar-content-owner` annotation value.
#[derive(Debug, Error)]
pub enum OwnerParseError {
    /// The value does not split into one or two `:`-separated parts.
    #[error("expected `uid` or `uid:gid`, got {0:?}")]
    Shape(String),
    /// A part is not a non-negative integer.
    #[error("owner id is not a non-negative integer: {0}")]
    Id(#[from] std::num::ParseIntError),
}

/// Parses a `uid` or `uid:gid` owner value.
///
/// A single part implies gid 0. Negative or non-integer parts fail.
///
/// # Errors
///
/// Returns an error for empty values, more than two parts, or parts that
/// are not non-negative integers.
pub fn parse_owner(raw: &str) -> std::result::Result<ContentOwner, OwnerParseError> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [uid] => Ok(ContentOwner {
            uid: uid.parse()?,
            gid: 0,
        }),
        [uid, gid] => Ok(ContentOwner {
            uid: uid.parse()?,
            gid: gid.parse()?,
        }),
        _ => Err(OwnerParseError::Shape(raw.to_owned())),
    }
}

/// One named intent to preserve a mount's upper directory.
///
/// Constructed once per hook invocation from annotation key/value pairs
/// and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDirective {
    /// Grouping key taken from the annotation namespace.
    pub name: String,
    /// Declared mount destination this directive applies to.
    pub mount_point: PathBuf,
    /// Copy or archive destination on the host.
    pub archive_to: PathBuf,
    /// Optional sentinel file created empty after a successful archive.
    pub success_marker: Option<PathBuf>,
    /// Preservation method, `copy` when unset.
    pub method: ArchiveMethod,
    /// Optional ownership override applied to tar entries.
    pub owner: Option<ContentOwner>,
}

/// Intermediate record for one directive name during the grouping pass.
#[derive(Debug, Default)]
struct DirectiveBuilder {
    mount_point: Option<String>,
    archive_to: Option<String>,
    success_marker: Option<String>,
    method: Option<String>,
    owner: Option<ContentOwner>,
}

/// Translates the annotation map into validated directives keyed by
/// mount point.
///
/// Keys outside the reserved prefix are ignored. Within it, unrecognized
/// arguments and unparsable owner values are warned about and skipped
/// without discarding the directive; a directive missing `mount-point` or
/// `archive-to`, or naming an unknown method, is dropped entirely. When
/// two directives claim the same mount point, names are visited in sorted
/// order and the first claimant wins; later ones are dropped with a
/// warning.
pub fn parse_directives(
    annotations: &HashMap<String, String>,
) -> BTreeMap<PathBuf, ArchiveDirective> {
    let mut builders: BTreeMap<String, DirectiveBuilder> = BTreeMap::new();
    for (key, value) in annotations {
        let Some(suffix) = key.strip_prefix(ANNOTATION_PREFIX) else {
            continue;
        };
        let mut segments = suffix.split('.');
        let (Some(name), Some(argument), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            tracing::warn!(key = %key, "malformed annotation key, expected <name>.<argument>");
            continue;
        };
        let builder = builders.entry(name.to_owned()).or_default();
        match argument {
            ARG_MOUNT_POINT => builder.mount_point = Some(value.clone()),
            ARG_ARCHIVE_TO => builder.archive_to = Some(value.clone()),
            ARG_SUCCESS => builder.success_marker = Some(value.clone()),
            ARG_METHOD => builder.method = Some(value.clone()),
            ARG_TAR_CONTENT_OWNER => match parse_owner(value) {
                Ok(owner) => builder.owner = Some(owner),
                Err(err) => {
                    tracing::warn!(
                        name = %name,
                        value = %value,
                        error = %err,
                        "ignoring unparsable tar-content-owner"
                    );
                }
            },
            other => {
                tracing::warn!(
                    name = %name,
                    argument = %other,
                    "ignoring unrecognized archive argument"
                );
            }
        }
    }

    let mut directives: BTreeMap<PathBuf, ArchiveDirective> = BTreeMap::new();
    for (name, builder) in builders {
        let Some(mount_point) = builder.mount_point.filter(|v| !v.is_empty()) else {
            tracing::warn!(name = %name, "dropping directive without a mount-point");
            continue;
        };
        let Some(archive_to) = builder.archive_to.filter(|v| !v.is_empty()) else {
            tracing::warn!(name = %name, "dropping directive without an archive-to");
            continue;
        };
        let method = match builder.method.as_deref() {
            None => ArchiveMethod::default(),
            Some(raw) => match ArchiveMethod::parse(raw) {
                Some(method) => method,
                None => {
                    tracing::warn!(name = %name, method = %raw, "dropping directive with unknown method");
                    continue;
                }
            },
        };
        let mount_point = PathBuf::from(mount_point);
        if directives.contains_key(&mount_point) {
            tracing::warn!(
                name = %name,
                mount_point = %mount_point.display(),
                "dropping directive: mount point already claimed"
            );
            continue;
        }
        let _ = directives.insert(
            mount_point.clone(),
            ArchiveDirective {
                name,
                mount_point,
                archive_to: PathBuf::from(archive_to),
                success_marker: builder
                    .success_marker
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from),
                method,
                owner: builder.owner,
            },
        );
    }
    directives
}
