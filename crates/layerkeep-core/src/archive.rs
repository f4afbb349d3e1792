//! Archive execution: recursive copy, tar+gzip with normalized headers,
//! and the success sentinel.
//!
//! Both executors walk the upper layer in a deterministic pre-order
//! (parents before children, siblings in lexical order). Any I/O failure
//! is fatal and aborts the run without rolling back partial output.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, Header};
use walkdir::WalkDir;

use crate::directive::ContentOwner;
use crate::error::{HookError, Result};

/// Recursively copies `upper_dir` into `archive_to`, preserving
/// permission bits, modification times, and directory structure.
///
/// The destination is created if absent; conflicting existing entries are
/// overwritten (merge semantics). Directory mtimes are restored children
/// first so the copy itself does not disturb them.
///
/// # Errors
///
/// Returns an error on any traversal or I/O failure.
pub fn archive_copy(upper_dir: &Path, archive_to: &Path) -> Result<()> {
    let mut dir_times: Vec<(PathBuf, FileTime)> = Vec::new();
    for entry in WalkDir::new(upper_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| HookError::Walk {
            path: upper_dir.to_path_buf(),
            source: e,
        })?;
        let Ok(rel) = entry.path().strip_prefix(upper_dir) else {
            continue;
        };
        let target = archive_to.join(rel);
        let metadata = entry.metadata().map_err(|e| HookError::Walk {
            path: entry.path().to_path_buf(),
            source: e,
        })?;
        let mtime = FileTime::from_last_modification_time(&metadata);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| HookError::Io {
                path: target.clone(),
                source: e,
            })?;
            fs::set_permissions(&target, metadata.permissions()).map_err(|e| HookError::Io {
                path: target.clone(),
                source: e,
            })?;
            dir_times.push((target, mtime));
        } else if entry.file_type().is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| HookError::Io {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
            replace_symlink(&link, &target)?;
        } else {
            let _ = fs::copy(entry.path(), &target).map_err(|e| HookError::Io {
                path: target.clone(),
                source: e,
            })?;
            filetime::set_file_mtime(&target, mtime).map_err(|e| HookError::Io {
                path: target.clone(),
                source: e,
            })?;
        }
    }
    // Children first, so restoring a directory's mtime is not undone by
    // writes inside it.
    for (path, mtime) in dir_times.into_iter().rev() {
        filetime::set_file_mtime(&path, mtime).map_err(|e| HookError::Io {
            path: path.clone(),
            source: e,
        })?;
    }
    Ok(())
}

/// Creates a symlink at `target`, replacing an existing file entry.
fn replace_symlink(link: &Path, target: &Path) -> Result<()> {
    match std::os::unix::fs::symlink(link, target) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            fs::remove_file(target).map_err(|e| HookError::Io {
                path: target.to_path_buf(),
                source: e,
            })?;
            std::os::unix::fs::symlink(link, target).map_err(|e| HookError::Io {
                path: target.to_path_buf(),
                source: e,
            })
        }
        Err(err) => Err(HookError::Io {
            path: target.to_path_buf(),
            source: err,
        }),
    }
}

/// Streams `upper_dir` into a gzip-compressed tar file at `archive_to`,
/// creating or truncating it.
///
/// Entry names are the `/`-separated paths relative to `upper_dir`,
/// prefixed with `./`; the root directory is recorded as `./` and
/// directory names carry a trailing `/`. With an owner override every
/// header's numeric uid/gid is forced and the symbolic names stay empty,
/// making the archive contents host-owner-independent. Overlay whiteout
/// files are archived like any other entry.
///
/// # Errors
///
/// Returns an error on any traversal or I/O failure.
pub fn archive_tar_gzip(
    upper_dir: &Path,
    archive_to: &Path,
    owner: Option<ContentOwner>,
) -> Result<()> {
    let file = File::create(archive_to).map_err(|e| HookError::Io {
        path: archive_to.to_path_buf(),
        source: e,
    })?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    for entry in WalkDir::new(upper_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| HookError::Walk {
            path: upper_dir.to_path_buf(),
            source: e,
        })?;
        let Ok(rel) = entry.path().strip_prefix(upper_dir) else {
            continue;
        };
        let metadata = entry.metadata().map_err(|e| HookError::Walk {
            path: entry.path().to_path_buf(),
            source: e,
        })?;
        let name = entry_name(rel, entry.file_type().is_dir());

        let mut header = Header::new_gnu();
        header.set_metadata(&metadata);
        if let Some(owner) = owner {
            header.set_uid(u64::from(owner.uid));
            header.set_gid(u64::from(owner.gid));
        }

        let io_err = |e| HookError::Io {
            path: archive_to.to_path_buf(),
            source: e,
        };
        if entry.file_type().is_dir() {
            builder
                .append_data(&mut header, &name, io::empty())
                .map_err(io_err)?;
        } else if entry.file_type().is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| HookError::Io {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
            header.set_size(0);
            builder
                .append_link(&mut header, &name, &link)
                .map_err(io_err)?;
        } else {
            let mut source = File::open(entry.path()).map_err(|e| HookError::Io {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
            builder
                .append_data(&mut header, &name, &mut source)
                .map_err(io_err)?;
        }
    }

    let encoder = builder.into_inner().map_err(|e| HookError::Io {
        path: archive_to.to_path_buf(),
        source: e,
    })?;
    let _ = encoder.finish().map_err(|e| HookError::Io {
        path: archive_to.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Creates (or truncates) the empty success sentinel at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be created.
pub fn write_marker(path: &Path) -> Result<()> {
    let _ = File::create(path).map_err(|e| HookError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Builds the normalized tar entry name for a path relative to the
/// archive root.
fn entry_name(rel: &Path, is_dir: bool) -> String {
    let mut name = String::from("./");
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if !parts.is_empty() {
        name.push_str(&parts.join("/"));
        if is_dir {
            name.push('/');
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Read;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    use flate2::read::GzDecoder;

    use super::*;

    const MOCK_CONTENT: &[u8] = b"MOCK_CONTENT";

    /// Creates `<root>/nested/dir/file.txt` (0600) plus a whiteout entry,
    /// with 0755 directories.
    fn populate_upper(root: &Path) -> PathBuf {
        let nested_dir = root.join("nested").join("dir");
        fs::create_dir_all(&nested_dir).expect("create nested dirs");
        for dir in [root, &root.join("nested"), &nested_dir] {
            fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
                .expect("set dir permissions");
        }
        let file = nested_dir.join("file.txt");
        fs::write(&file, MOCK_CONTENT).expect("write file");
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600))
            .expect("set file permissions");
        fs::write(nested_dir.join(".wh.deleted.txt"), b"").expect("write whiteout");
        file
    }

    fn read_headers(archive_path: &Path) -> HashMap<String, (u64, u64, String, String, Vec<u8>)> {
        let file = File::open(archive_path).expect("open archive");
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut headers = HashMap::new();
        for entry in archive.entries().expect("read entries") {
            let mut entry = entry.expect("read entry");
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let uid = entry.header().uid().expect("uid");
            let gid = entry.header().gid().expect("gid");
            let uname = entry
                .header()
                .username()
                .expect("uname utf8")
                .unwrap_or("")
                .to_owned();
            let gname = entry
                .header()
                .groupname()
                .expect("gname utf8")
                .unwrap_or("")
                .to_owned();
            let mut content = Vec::new();
            let _ = entry.read_to_end(&mut content).expect("read content");
            let _ = headers.insert(name, (uid, gid, uname, gname, content));
        }
        headers
    }

    #[test]
    fn copy_preserves_structure_modes_and_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("create src");
        let _ = populate_upper(&src);
        let dest = tmp.path().join("dest");

        archive_copy(&src, &dest).expect("copy succeeds");

        let copied = dest.join("nested").join("dir").join("file.txt");
        assert_eq!(fs::read(&copied).expect("read copied"), MOCK_CONTENT);
        let file_mode = fs::metadata(&copied).expect("stat file").mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(dest.join("nested").join("dir"))
            .expect("stat dir")
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o755);
    }

    #[test]
    fn copy_preserves_file_mtime() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("create src");
        let file = src.join("file.txt");
        fs::write(&file, MOCK_CONTENT).expect("write file");
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&file, mtime).expect("set mtime");

        let dest = tmp.path().join("dest");
        archive_copy(&src, &dest).expect("copy succeeds");

        let copied_meta = fs::metadata(dest.join("file.txt")).expect("stat copy");
        assert_eq!(
            FileTime::from_last_modification_time(&copied_meta).unix_seconds(),
            1_600_000_000
        );
    }

    #[test]
    fn copy_overwrites_conflicting_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("create src");
        fs::write(src.join("file.txt"), MOCK_CONTENT).expect("write file");

        let dest = tmp.path().join("dest");
        fs::create_dir(&dest).expect("create dest");
        fs::write(dest.join("file.txt"), b"stale").expect("write stale");
        fs::write(dest.join("keep.txt"), b"kept").expect("write kept");

        archive_copy(&src, &dest).expect("copy succeeds");

        assert_eq!(fs::read(dest.join("file.txt")).expect("read"), MOCK_CONTENT);
        // Merge semantics: unrelated destination entries survive.
        assert_eq!(fs::read(dest.join("keep.txt")).expect("read"), b"kept");
    }

    #[test]
    fn copy_recreates_symlinks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("create src");
        fs::write(src.join("target.txt"), MOCK_CONTENT).expect("write target");
        std::os::unix::fs::symlink("target.txt", src.join("link")).expect("create symlink");

        let dest = tmp.path().join("dest");
        archive_copy(&src, &dest).expect("copy succeeds");

        let link = fs::read_link(dest.join("link")).expect("read link");
        assert_eq!(link, PathBuf::from("target.txt"));
    }

    #[test]
    fn tar_gzip_normalizes_names_and_forces_owner() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("create src");
        let _ = populate_upper(&src);
        let output = tmp.path().join("output.tar.gz");

        archive_tar_gzip(
            &src,
            &output,
            Some(ContentOwner {
                uid: 2000,
                gid: 3000,
            }),
        )
        .expect("archive succeeds");

        let headers = read_headers(&output);
        for name in [
            "./",
            "./nested/",
            "./nested/dir/",
            "./nested/dir/file.txt",
            "./nested/dir/.wh.deleted.txt",
        ] {
            let (uid, gid, uname, gname, _) =
                headers.get(name).unwrap_or_else(|| panic!("missing {name}"));
            assert_eq!(*uid, 2000, "uid of {name}");
            assert_eq!(*gid, 3000, "gid of {name}");
            assert_eq!(uname, "", "uname of {name}");
            assert_eq!(gname, "", "gname of {name}");
        }
        let (_, _, _, _, content) = &headers["./nested/dir/file.txt"];
        assert_eq!(content, MOCK_CONTENT);
    }

    #[test]
    fn tar_gzip_without_override_preserves_original_owner() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("create src");
        fs::write(src.join("file.txt"), MOCK_CONTENT).expect("write file");
        let expected_uid = fs::metadata(&src).expect("stat src").uid();
        let output = tmp.path().join("output.tar.gz");

        archive_tar_gzip(&src, &output, None).expect("archive succeeds");

        let headers = read_headers(&output);
        let (uid, _, uname, _, _) = &headers["./file.txt"];
        assert_eq!(*uid, u64::from(expected_uid));
        assert_eq!(uname, "");
    }

    #[test]
    fn tar_gzip_carries_symlinks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        fs::create_dir(&src).expect("create src");
        fs::write(src.join("target.txt"), MOCK_CONTENT).expect("write target");
        std::os::unix::fs::symlink("target.txt", src.join("link")).expect("create symlink");
        let output = tmp.path().join("output.tar.gz");

        archive_tar_gzip(&src, &output, None).expect("archive succeeds");

        let file = File::open(&output).expect("open archive");
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let entry = archive
            .entries()
            .expect("entries")
            .map(|e| e.expect("entry"))
            .find(|e| String::from_utf8_lossy(&e.path_bytes()) == "./link")
            .expect("link entry present");
        assert!(entry.header().entry_type().is_symlink());
        let link = entry
            .link_name()
            .expect("link name")
            .expect("link target set");
        assert_eq!(link.as_ref(), Path::new("target.txt"));
    }

    #[test]
    fn marker_is_created_empty_and_truncates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let marker = tmp.path().join("success");
        fs::write(&marker, b"old content").expect("write old");

        write_marker(&marker).expect("marker written");

        assert_eq!(fs::metadata(&marker).expect("stat marker").len(), 0);
    }

    #[test]
    fn entry_name_shapes() {
        assert_eq!(entry_name(Path::new(""), true), "./");
        assert_eq!(entry_name(Path::new("nested"), true), "./nested/");
        assert_eq!(
            entry_name(Path::new("nested/dir/file.txt"), false),
            "./nested/dir/file.txt"
        );
    }
}
