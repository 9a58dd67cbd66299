//! Tar archive extraction and reproducible repackaging.
//!
//! Sources may be plain or gzip-compressed tar archives. Packaging always
//! produces gzip-compressed tar with stable entry order and zeroed
//! ownership and timestamps, so identical trees give identical bytes.

use std::io::Read;
use std::path::{Component, Path};

use a3s_ocm_core::error::{OcmError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_BLOCK: usize = 512;

pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// POSIX and GNU headers carry `ustar` at offset 257.
fn is_tar(data: &[u8]) -> bool {
    data.len() >= TAR_BLOCK && &data[257..262] == b"ustar"
}

/// An archive with no entries is just zero blocks.
fn is_empty_tar(data: &[u8]) -> bool {
    !data.is_empty() && data.len() % TAR_BLOCK == 0 && data.iter().all(|b| *b == 0)
}

/// Extract a plain or gzip-compressed tar into `target`.
///
/// Anything that is not a tar archive is a validation error. Entries that
/// would land outside `target` are skipped by the tar crate, and links whose
/// target leaves `target` fail the whole extraction.
pub fn unpack(data: &[u8], target: &Path) -> Result<()> {
    let decompressed;
    let tar_bytes = if is_gzip(data) {
        let mut out = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| OcmError::ValidationError(format!("Invalid gzip stream: {}", e)))?;
        decompressed = out;
        decompressed.as_slice()
    } else {
        data
    };

    if !is_tar(tar_bytes) && !is_empty_tar(tar_bytes) {
        return Err(OcmError::ValidationError(
            "Source content is not a tar archive".to_string(),
        ));
    }

    std::fs::create_dir_all(target)?;
    let extract_err = |e: std::io::Error| {
        OcmError::ValidationError(format!(
            "Failed to extract archive to {}: {}",
            target.display(),
            e
        ))
    };
    let mut archive = Archive::new(tar_bytes);
    archive.set_preserve_permissions(false);
    archive.set_preserve_mtime(false);
    for entry in archive.entries().map_err(extract_err)? {
        let mut entry = entry.map_err(extract_err)?;
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let path = entry.path().map_err(extract_err)?.into_owned();
            let link = entry
                .link_name()
                .map_err(extract_err)?
                .map(|l| l.into_owned())
                .unwrap_or_default();
            if !link_stays_inside(&path, &link, kind.is_hard_link()) {
                return Err(OcmError::ValidationError(format!(
                    "Archive entry '{}' links outside the extracted tree ('{}')",
                    path.display(),
                    link.display()
                )));
            }
        }
        entry.unpack_in(target).map_err(extract_err)?;
    }

    tracing::debug!(
        dir = %target.display(),
        gzip = is_gzip(data),
        size = data.len(),
        "Extracted archive"
    );
    Ok(())
}

/// Whether a link stored at `entry` and pointing at `link` stays inside the
/// extraction root. Symlinks resolve against the entry's directory, hard
/// links against the root.
fn link_stays_inside(entry: &Path, link: &Path, hard: bool) -> bool {
    let base = if hard { None } else { entry.parent() };
    let mut depth = base
        .map(|dir| {
            dir.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count()
        })
        .unwrap_or(0);
    for component in link.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    !link.as_os_str().is_empty()
}

/// Package the tree under `root` as a reproducible tar.gz.
pub fn pack(root: &Path) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| OcmError::IoError(e.into()))?;
        let relative = entry.path().strip_prefix(root).map_err(|e| {
            OcmError::Invariant(format!(
                "{} is outside {}: {}",
                entry.path().display(),
                root.display(),
                e
            ))
        })?;

        let mut header = Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, relative, std::io::empty())?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            builder.append_link(&mut header, relative, link)?;
        } else {
            let data = std::fs::read(entry.path())?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, relative, data.as_slice())?;
        }
        entries += 1;
    }

    let encoder = builder.into_inner()?;
    let packed = encoder.finish()?;
    tracing::debug!(
        root = %root.display(),
        entries,
        size = packed.len(),
        "Packaged tree"
    );
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn write_tree(root: &Path, files: &[(&str, &str)]) {
        for (path, content) in files {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
    }

    fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                (
                    e.path().strip_prefix(root).unwrap().display().to_string(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    fn plain_tar(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (path, content) in files {
            let mut header = Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let src = TempDir::new().unwrap();
        let files = [
            ("configmap.yaml", "data: {}\n"),
            ("charts/web/values.yaml", "image: nginx\n"),
            ("README", "hello"),
        ];
        write_tree(src.path(), &files);

        let packed = pack(src.path()).unwrap();
        assert!(is_gzip(&packed));

        let dst = TempDir::new().unwrap();
        unpack(&packed, dst.path()).unwrap();
        assert_eq!(read_tree(src.path()), read_tree(dst.path()));
    }

    #[test]
    fn test_pack_is_reproducible() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        // Written in different orders
        write_tree(a.path(), &[("x.yaml", "1"), ("y/z.yaml", "2")]);
        write_tree(b.path(), &[("y/z.yaml", "2"), ("x.yaml", "1")]);

        assert_eq!(pack(a.path()).unwrap(), pack(b.path()).unwrap());
    }

    #[test]
    fn test_packed_headers_are_zeroed() {
        let src = TempDir::new().unwrap();
        write_tree(src.path(), &[("dir/file.txt", "content")]);
        let packed = pack(src.path()).unwrap();

        let mut archive = Archive::new(GzDecoder::new(packed.as_slice()));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.mtime().unwrap(), 0);
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
            names.push(entry.path().unwrap().display().to_string());
        }
        assert_eq!(names.len(), 2);
        assert_eq!(names[1], "dir/file.txt");
    }

    #[test]
    fn test_unpack_plain_tar() {
        let dst = TempDir::new().unwrap();
        unpack(&plain_tar(&[("a.yaml", "a: 1\n")]), dst.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dst.path().join("a.yaml")).unwrap(),
            "a: 1\n"
        );
    }

    #[test]
    fn test_unpack_rejects_non_tar() {
        let dst = TempDir::new().unwrap();
        let err = unpack(b"just some text", dst.path()).unwrap_err();
        assert!(matches!(err, OcmError::ValidationError(_)));

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut gz, b"compressed text").unwrap();
        let err = unpack(&gz.finish().unwrap(), dst.path()).unwrap_err();
        assert!(matches!(err, OcmError::ValidationError(_)));
    }

    fn link_tar(path: &str, link: &Path, kind: EntryType) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(kind);
        header.set_size(0);
        header.set_mode(0o777);
        builder.append_link(&mut header, path, link).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_unpack_rejects_symlink_out_of_tree() {
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("victim.yaml");
        fs::write(&victim, "a: 1\n").unwrap();

        for link in [victim.clone(), Path::new("../../victim.yaml").to_path_buf()] {
            let dst = TempDir::new().unwrap();
            let tar = link_tar("configmap.yaml", &link, EntryType::Symlink);
            let err = unpack(&tar, dst.path()).unwrap_err();
            assert!(matches!(err, OcmError::ValidationError(_)), "{link:?}");
            assert!(fs::symlink_metadata(dst.path().join("configmap.yaml")).is_err());
        }

        let dst = TempDir::new().unwrap();
        let tar = link_tar("data.yaml", Path::new("/etc/passwd"), EntryType::Link);
        assert!(unpack(&tar, dst.path()).is_err());
        assert_eq!(fs::read_to_string(&victim).unwrap(), "a: 1\n");
    }

    #[test]
    fn test_link_stays_inside() {
        assert!(link_stays_inside(
            Path::new("charts/web/values.yaml"),
            Path::new("../common/values.yaml"),
            false
        ));
        assert!(link_stays_inside(Path::new("a.yaml"), Path::new("b.yaml"), false));
        assert!(!link_stays_inside(Path::new("a.yaml"), Path::new("../b.yaml"), false));
        assert!(!link_stays_inside(Path::new("a.yaml"), Path::new("/b.yaml"), false));
        assert!(!link_stays_inside(Path::new("a.yaml"), Path::new(""), false));
        // Hard links name a path relative to the archive root.
        assert!(link_stays_inside(Path::new("x/a.yaml"), Path::new("x/b.yaml"), true));
        assert!(!link_stays_inside(Path::new("x/a.yaml"), Path::new("../b.yaml"), true));
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_keeps_symlink_within_tree() {
        let src = TempDir::new().unwrap();
        write_tree(src.path(), &[("base/values.yaml", "image: nginx\n")]);
        std::os::unix::fs::symlink("base/values.yaml", src.path().join("values.yaml")).unwrap();

        let dst = TempDir::new().unwrap();
        unpack(&pack(src.path()).unwrap(), dst.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dst.path().join("values.yaml")).unwrap(),
            "image: nginx\n"
        );
    }

    #[test]
    fn test_unpack_empty_archive() {
        let dst = TempDir::new().unwrap();
        unpack(&plain_tar(&[]), dst.path()).unwrap();
        assert!(read_tree(dst.path()).is_empty());
    }
}
