//! The `.kpkg` package format.
//!
//! A `.kpkg` is a gzip-compressed tar holding exactly two members:
//! - `package.kdl` - the descriptor
//! - `files.tar.zst` - the installed tree, as a zstd-compressed tar
//!
//! The inner tar is deterministic: entries sorted by path, mtime zeroed,
//! modes and ownership taken from the staged files.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

use super::ArtifactId;
use crate::descriptor::DESCRIPTOR_FILENAME;

pub const FILES_DIR: &str = "files";
pub const FILES_ARCHIVE: &str = "files.tar.zst";

const ZSTD_LEVEL: i32 = 3;

/// Build `<assembly_dir>/<id>.kpkg` from `files/` and `package.kdl`.
pub fn build_kpkg(assembly_dir: &Path, id: &ArtifactId) -> Result<PathBuf> {
    let files_dir = assembly_dir.join(FILES_DIR);
    if !files_dir.is_dir() {
        bail!("missing '{}' directory in '{}'", FILES_DIR, assembly_dir.display());
    }
    let descriptor = assembly_dir.join(DESCRIPTOR_FILENAME);
    if !descriptor.is_file() {
        bail!("missing {} in '{}'", DESCRIPTOR_FILENAME, assembly_dir.display());
    }

    let files_archive = assembly_dir.join(FILES_ARCHIVE);
    create_tar_zst(&files_dir, &files_archive)?;

    let output = assembly_dir.join(id.file_name());
    let out = File::create(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut builder = TarBuilder::new(GzEncoder::new(out, Compression::default()));
    builder.mode(tar::HeaderMode::Deterministic);
    builder
        .append_path_with_name(&descriptor, DESCRIPTOR_FILENAME)
        .with_context(|| format!("adding {} to {}", DESCRIPTOR_FILENAME, output.display()))?;
    builder
        .append_path_with_name(&files_archive, FILES_ARCHIVE)
        .with_context(|| format!("adding {} to {}", FILES_ARCHIVE, output.display()))?;
    let encoder = builder
        .into_inner()
        .with_context(|| "Failed to finalize package tar")?;
    encoder.finish()?;

    fs::remove_file(&files_archive)
        .with_context(|| format!("removing '{}'", files_archive.display()))?;
    Ok(output)
}

/// Read the descriptor text out of a `.kpkg`.
pub fn read_descriptor(kpkg: &Path) -> Result<String> {
    let file = File::open(kpkg).with_context(|| format!("opening '{}'", kpkg.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == Path::new(DESCRIPTOR_FILENAME) {
            let mut text = String::new();
            entry.read_to_string(&mut text)?;
            return Ok(text);
        }
    }
    bail!("{} not found in '{}'", DESCRIPTOR_FILENAME, kpkg.display())
}

/// Relative paths stored in the `files.tar.zst` member of a `.kpkg`.
pub fn list_files(kpkg: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(kpkg).with_context(|| format!("opening '{}'", kpkg.display()))?;
    let mut outer = tar::Archive::new(GzDecoder::new(file));
    for entry in outer.entries()? {
        let entry = entry?;
        if entry.path()?.as_ref() != Path::new(FILES_ARCHIVE) {
            continue;
        }
        let mut inner = tar::Archive::new(zstd::stream::Decoder::new(entry)?);
        let mut paths = Vec::new();
        for file in inner.entries()? {
            let file = file?;
            if file.header().entry_type() != tar::EntryType::Directory {
                paths.push(file.path()?.into_owned());
            }
        }
        return Ok(paths);
    }
    bail!("{} not found in '{}'", FILES_ARCHIVE, kpkg.display())
}

fn create_tar_zst(src_dir: &Path, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?;
    let mut builder = TarBuilder::new(encoder);

    // Collect paths deterministically.
    let mut entries: Vec<PathBuf> = vec![];
    for ent in WalkDir::new(src_dir).follow_links(false) {
        let ent = ent.with_context(|| format!("walking '{}'", src_dir.display()))?;
        if ent.path() == src_dir {
            continue;
        }
        entries.push(ent.path().to_path_buf());
    }
    entries.sort_by(|a, b| {
        let ra = a.strip_prefix(src_dir).unwrap_or(a).to_string_lossy();
        let rb = b.strip_prefix(src_dir).unwrap_or(b).to_string_lossy();
        ra.cmp(&rb)
    });

    for p in entries {
        let rel = p
            .strip_prefix(src_dir)
            .unwrap_or(&p)
            .to_string_lossy()
            .into_owned();

        let md = fs::symlink_metadata(&p)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(md.uid() as u64);
        header.set_gid(md.gid() as u64);
        header.set_mode(md.permissions().mode() & 0o7777);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&p)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            // Targets past the 100-byte header field go into a GNU long-link record.
            builder.append_link(&mut header, rel, &target)?;
        } else if md.is_file() {
            let mut f = File::open(&p)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut f)?;
        } else {
            bail!(
                "unsupported file type in staged tree: '{}'",
                p.display()
            );
        }
    }

    let encoder = builder
        .into_inner()
        .with_context(|| "Failed to finalize tar builder")?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn assembly(temp: &TempDir) -> PathBuf {
        let dir = temp.path().join("pkg");
        fs::create_dir_all(dir.join("files/usr/bin")).unwrap();
        fs::write(dir.join("files/usr/bin/demo"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(dir.join("files/usr/bin/demo"), fs::Permissions::from_mode(0o755))
            .unwrap();
        std::os::unix::fs::symlink("demo", dir.join("files/usr/bin/d")).unwrap();
        fs::write(
            dir.join(DESCRIPTOR_FILENAME),
            "package \"demo\" version=\"1.0\" arch=\"x86_64\" flavour=\"f\" {\n    license \"MIT\"\n}\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn builds_kpkg_with_descriptor_and_files() {
        let temp = TempDir::new().unwrap();
        let dir = assembly(&temp);
        let id = ArtifactId::new("demo", "1.0", "x86_64");

        let out = build_kpkg(&dir, &id).unwrap();
        assert_eq!(out, dir.join("demo-1.0-x86_64.kpkg"));
        assert!(!dir.join(FILES_ARCHIVE).exists());

        assert!(read_descriptor(&out).unwrap().starts_with("package \"demo\""));
        assert_eq!(
            list_files(&out).unwrap(),
            vec![PathBuf::from("usr/bin/d"), PathBuf::from("usr/bin/demo")]
        );
    }

    #[test]
    fn inner_archive_keeps_modes_and_symlinks() {
        let temp = TempDir::new().unwrap();
        let dir = assembly(&temp);
        let out = build_kpkg(&dir, &ArtifactId::new("demo", "1.0", "x86_64")).unwrap();

        let mut outer = tar::Archive::new(GzDecoder::new(File::open(&out).unwrap()));
        let files_member = outer
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().as_ref() == Path::new(FILES_ARCHIVE))
            .unwrap();
        let mut inner = tar::Archive::new(zstd::stream::Decoder::new(files_member).unwrap());
        for entry in inner.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().into_owned();
            if path == Path::new("usr/bin/demo") {
                assert_eq!(entry.header().mode().unwrap() & 0o777, 0o755);
            }
            if path == Path::new("usr/bin/d") {
                assert_eq!(entry.header().entry_type(), tar::EntryType::Symlink);
                assert_eq!(entry.link_name().unwrap().unwrap().as_ref(), Path::new("demo"));
            }
        }
    }

    #[test]
    fn long_symlink_targets_are_kept() {
        let temp = TempDir::new().unwrap();
        let dir = assembly(&temp);
        let target = format!(
            "../libexec/gcc/x86_64-seiryo-linux-gnu/13.2.0/{}/liblto_plugin.so",
            "plugin-subdir".repeat(8)
        );
        assert!(target.len() > 100);
        fs::create_dir_all(dir.join("files/usr/lib")).unwrap();
        std::os::unix::fs::symlink(&target, dir.join("files/usr/lib/liblto_plugin.so")).unwrap();

        let out = build_kpkg(&dir, &ArtifactId::new("demo", "1.0", "x86_64")).unwrap();
        assert!(list_files(&out)
            .unwrap()
            .contains(&PathBuf::from("usr/lib/liblto_plugin.so")));

        let mut outer = tar::Archive::new(GzDecoder::new(File::open(&out).unwrap()));
        let files_member = outer
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().as_ref() == Path::new(FILES_ARCHIVE))
            .unwrap();
        let mut inner = tar::Archive::new(zstd::stream::Decoder::new(files_member).unwrap());
        let link = inner
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().as_ref() == Path::new("usr/lib/liblto_plugin.so"))
            .unwrap();
        assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(link.link_name().unwrap().unwrap().as_ref(), Path::new(&target));
    }

    #[test]
    fn missing_descriptor_fails() {
        let temp = TempDir::new().unwrap();
        let dir = assembly(&temp);
        fs::remove_file(dir.join(DESCRIPTOR_FILENAME)).unwrap();
        assert!(build_kpkg(&dir, &ArtifactId::new("demo", "1.0", "x86_64")).is_err());
    }
}
