/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, Read};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to unarchive file: {0}")]
    Unarchive(#[source] io::Error),
    #[error("failed to archive directory: {0}")]
    Archive(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedFile {
    pub relative: String,
    pub absolute: PathBuf,
    pub size: u64,
}

pub fn is_gzip(prefix: &[u8]) -> bool {
    prefix.starts_with(&[0x1f, 0x8b])
}

/// Lexically cleans an archive entry name. Returns `None` for empty names and
/// for names that climb above the archive root.
pub fn clean_path(name: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();

    for part in name.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                parts.pop()?;
            }
            p => parts.push(p),
        }
    }

    if parts.is_empty() {
        return None;
    }

    Some(parts.join("/"))
}

/// Strips `prefix` from `path`, returning the remainder when `path` lies
/// strictly inside it. An empty prefix keeps every path.
pub fn strip_dir_prefix(path: &str, prefix: &str) -> Option<String> {
    let Some(prefix) = clean_path(prefix) else {
        return Some(path.to_string());
    };

    path.strip_prefix(&prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.to_string())
}

pub fn unpack_tar_gz(archive: &Path, dest: &Path) -> Result<Vec<UnpackedFile>, ArchiveError> {
    let file = File::open(archive).map_err(ArchiveError::Unarchive)?;
    unpack_entries(file, dest, |name| Some(name.to_string()))
}

/// Unpacks only the files below `subdir` after dropping the first
/// `strip_components` path elements, so `repo-sha/build/index.html` with
/// `subdir = "build"` lands at `dest/index.html`.
pub fn unpack_subtree<R: Read>(
    reader: R,
    dest: &Path,
    strip_components: usize,
    subdir: &str,
) -> Result<Vec<UnpackedFile>, ArchiveError> {
    unpack_entries(reader, dest, |name| {
        let stripped = name
            .splitn(strip_components + 1, '/')
            .nth(strip_components)?;
        strip_dir_prefix(stripped, subdir)
    })
}

fn unpack_entries<R: Read>(
    reader: R,
    dest: &Path,
    map: impl Fn(&str) -> Option<String>,
) -> Result<Vec<UnpackedFile>, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut files = Vec::new();

    for entry in archive.entries().map_err(ArchiveError::Unarchive)? {
        let mut entry = entry.map_err(ArchiveError::Unarchive)?;
        let entry_type = entry.header().entry_type();

        let name = entry
            .path()
            .map_err(ArchiveError::Unarchive)?
            .to_string_lossy()
            .to_string();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!(entry = %name, "Skipping link in archive");
            continue;
        }

        if !entry_type.is_file() {
            continue;
        }

        let Some(clean) = clean_path(&name) else {
            warn!(entry = %name, "Skipping archive entry outside of the root");
            continue;
        };

        let Some(relative) = map(&clean) else {
            continue;
        };

        let absolute = dest.join(&relative);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).map_err(ArchiveError::Unarchive)?;
        }

        let mut out = File::create(&absolute).map_err(ArchiveError::Unarchive)?;
        let size = io::copy(&mut entry, &mut out).map_err(ArchiveError::Unarchive)?;

        files.push(UnpackedFile {
            relative,
            absolute,
            size,
        });
    }

    Ok(files)
}

/// Lists regular files below `dir` as (absolute, relative) pairs in a stable
/// order. Symlinks are not followed.
pub fn list_files(dir: &Path) -> io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<(PathBuf, String)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
                .to_string_lossy()
                .replace('\\', "/");
            files.push((path, relative));
        }
    }

    Ok(())
}

/// Packs the regular files below `src` into a gzipped tarball at `out`.
pub fn pack_dir(src: &Path, out: &Path) -> Result<(), ArchiveError> {
    let file = File::create(out).map_err(ArchiveError::Archive)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    for (absolute, relative) in list_files(src).map_err(ArchiveError::Archive)? {
        builder
            .append_path_with_name(&absolute, &relative)
            .map_err(ArchiveError::Archive)?;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(ArchiveError::Archive)?;

    Ok(())
}

/// Hex SHA-256 of a file, the checksum bundles are deduplicated by.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            let raw = &mut header.as_old_mut().name;
            raw[..name.len()].copy_from_slice(name.as_bytes());
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("./index.html"), Some("index.html".to_string()));
        assert_eq!(clean_path("a/./b//c.css"), Some("a/b/c.css".to_string()));
        assert_eq!(clean_path("a/../b.js"), Some("b.js".to_string()));
        assert_eq!(clean_path("/etc/passwd"), Some("etc/passwd".to_string()));
        assert_eq!(clean_path("../evil"), None);
        assert_eq!(clean_path("a/../../evil"), None);
        assert_eq!(clean_path("."), None);
    }

    #[test]
    fn test_strip_dir_prefix() {
        assert_eq!(
            strip_dir_prefix("build/index.html", "./build"),
            Some("index.html".to_string())
        );
        assert_eq!(strip_dir_prefix("src/main.js", "build"), None);
        assert_eq!(strip_dir_prefix("buildx/a.html", "build"), None);
        assert_eq!(
            strip_dir_prefix("index.html", ""),
            Some("index.html".to_string())
        );
        assert_eq!(
            strip_dir_prefix("index.html", "."),
            Some("index.html".to_string())
        );
    }

    #[test]
    fn test_unpack_skips_escaping_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bundle.tar.gz");
        let dest = tmp.path().join("out");
        write_tar_gz(
            &archive,
            &[
                ("./index.html", b"hi"),
                ("css/site.css", b"body{}"),
                ("../evil.txt", b"nope"),
            ],
        );

        let files = unpack_tar_gz(&archive, &dest).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();

        assert_eq!(names, vec!["index.html", "css/site.css"]);
        assert_eq!(fs::read(dest.join("index.html")).unwrap(), b"hi");
        assert_eq!(files[1].size, 6);
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_unpack_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("repo.tar.gz");
        let dest = tmp.path().join("out");
        write_tar_gz(
            &archive,
            &[
                ("owner-repo-abc/README.md", b"readme"),
                ("owner-repo-abc/build/index.html", b"<html></html>"),
                ("owner-repo-abc/build/js/app.js", b"1"),
            ],
        );

        let files = unpack_subtree(File::open(&archive).unwrap(), &dest, 1, "./build").unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();

        assert_eq!(names, vec!["index.html", "js/app.js"]);
        assert!(!dest.join("README.md").exists());
    }

    #[test]
    fn test_pack_and_unpack() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("img")).unwrap();
        fs::write(src.join("index.html"), b"hi").unwrap();
        fs::write(src.join("img/logo.png"), b"png").unwrap();

        let archive = tmp.path().join("packed.tar.gz");
        pack_dir(&src, &archive).unwrap();

        let mut prefix = [0u8; 2];
        File::open(&archive).unwrap().read_exact(&mut prefix).unwrap();
        assert!(is_gzip(&prefix));

        let files = unpack_tar_gz(&archive, &tmp.path().join("out")).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["img/logo.png", "index.html"]);
    }

    #[test]
    fn test_sha256_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundle.tar.gz");
        fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
