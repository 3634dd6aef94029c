//! Filesystem utilities for staging and assembly trees.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively copy a directory, preserving symlinks and permissions.
///
/// Unlike `fs::copy`, this properly handles:
/// - Nested directories (mode copied after their contents)
/// - Symbolic links (preserved, not followed)
/// - Ownership, when the process may change it (running as root)
///
/// # Example
///
/// ```rust,ignore
/// use seiryo_bootstrap::artifact::filesystem::copy_dir_recursive;
/// use std::path::Path;
///
/// copy_dir_recursive(Path::new("work/zlib-1.3.1/destdir"), Path::new("work/zlib-1.3.1/pkg/files"))?;
/// ```
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    let preserve_owner = running_as_root();
    copy_dir_inner(src, dst, preserve_owner)
}

fn copy_dir_inner(src: &Path, dst: &Path, preserve_owner: bool) -> Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
    }

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path)?;
            if dst_path.exists() || dst_path.is_symlink() {
                fs::remove_file(&dst_path)?;
            }
            std::os::unix::fs::symlink(&target, &dst_path)
                .with_context(|| format!("Failed to create symlink: {}", dst_path.display()))?;
        } else if file_type.is_dir() {
            copy_dir_inner(&src_path, &dst_path, preserve_owner)?;
        } else {
            // fs::copy carries the permission bits over.
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        }

        if preserve_owner {
            copy_ownership(&src_path, &dst_path)?;
        }
    }

    let mode = fs::metadata(src)?.permissions().mode();
    fs::set_permissions(dst, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions: {}", dst.display()))?;

    Ok(())
}

fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn copy_ownership(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src)?;
    std::os::unix::fs::lchown(dst, Some(meta.uid()), Some(meta.gid()))
        .with_context(|| format!("Failed to set ownership: {}", dst.display()))
}

/// Relative paths of every non-directory entry under `root`, sorted.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativizing '{}'", entry.path().display()))?;
        files.push(rel.to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Remove `dir` if present and create it empty.
pub fn recreate_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove directory: {}", dir.display()))?;
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))
}

/// Atomically move a file by renaming, with fallback to copy+delete.
///
/// The fallback is not atomic; use [`publish_file`] when readers may observe
/// the destination.
pub fn atomic_move(src: &Path, dst: &Path) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)
                .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
            fs::remove_file(src)
                .with_context(|| format!("Failed to remove {}", src.display()))?;
            Ok(())
        }
    }
}

/// Move `src` to `dst` so that `dst` is either absent or complete.
///
/// The file is first placed next to `dst` under a hidden temporary name, then
/// renamed over it, which is atomic within one filesystem.
pub fn publish_file(src: &Path, dst: &Path) -> Result<()> {
    let parent = dst
        .parent()
        .ok_or_else(|| anyhow::anyhow!("publish target has no parent: {}", dst.display()))?;
    fs::create_dir_all(parent)?;
    let file_name = dst
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("publish target has no file name: {}", dst.display()))?;
    let tmp = parent.join(format!(".{file_name}.incoming"));
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }
    atomic_move(src, &tmp)?;
    fs::rename(&tmp, dst)
        .with_context(|| format!("Failed to rename {} to {}", tmp.display(), dst.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_recursive() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");

        fs::create_dir_all(src.join("usr/bin")).unwrap();
        fs::write(src.join("usr/bin/demo"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("usr/bin/demo"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(src.join("usr/readme"), "hello").unwrap();
        std::os::unix::fs::symlink("demo", src.join("usr/bin/demo-alias")).unwrap();

        copy_dir_recursive(&src, &dst).unwrap();

        assert!(dst.join("usr/readme").exists());
        assert!(dst.join("usr/bin/demo-alias").is_symlink());
        assert_eq!(
            fs::read_link(dst.join("usr/bin/demo-alias")).unwrap().to_str().unwrap(),
            "demo"
        );
        let mode = fs::metadata(dst.join("usr/bin/demo")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_list_files_is_sorted_and_relative() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("usr/lib")).unwrap();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::write(root.join("usr/lib/libz.a"), "").unwrap();
        fs::write(root.join("usr/bin/demo"), "").unwrap();
        std::os::unix::fs::symlink("libz.a", root.join("usr/lib/libz.so")).unwrap();

        let files = list_files(root).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("usr/bin/demo"),
                PathBuf::from("usr/lib/libz.a"),
                PathBuf::from("usr/lib/libz.so"),
            ]
        );
    }

    #[test]
    fn test_recreate_dir_empties() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("destdir");
        fs::create_dir_all(dir.join("stale")).unwrap();
        recreate_dir(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_publish_file() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("work/demo.kpkg");
        let dst = temp.path().join("repo/demo.kpkg");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, "content").unwrap();

        publish_file(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "content");
        assert!(!temp.path().join("repo/.demo.kpkg.incoming").exists());
    }
}
