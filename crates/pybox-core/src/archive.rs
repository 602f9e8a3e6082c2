//! Tar helpers for moving file trees across the container boundary.
//!
//! The Docker archive endpoints are the one portable way to copy files into
//! and out of a container, so both directions go through here.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Mode given to staged files so the unprivileged run identity can use them.
pub const STAGED_FILE_MODE: u32 = 0o666;
/// Mode given to staged directories.
pub const STAGED_DIR_MODE: u32 = 0o777;

/// A regular file read back from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Entry path as stored in the archive.
    pub path: String,
    pub data: Vec<u8>,
}

/// Pack the contents of `dir` (not the directory itself) into an in-memory tar.
///
/// Ownership is reset to root and permissions are normalised to
/// [`STAGED_FILE_MODE`] / [`STAGED_DIR_MODE`], so whatever identity the
/// container runs as can read and write the extracted tree. Symlinks and
/// other special files are skipped.
pub fn pack_directory(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    append_tree(&mut builder, dir, "")?;

    builder.into_inner()
}

fn append_tree(builder: &mut tar::Builder<Vec<u8>>, dir: &Path, prefix: &str) -> io::Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let archive_path = format!("{}{}", prefix, name);
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let mut header = dir_header();
            builder.append_data(&mut header, format!("{}/", archive_path), io::empty())?;
            append_tree(builder, &entry.path(), &format!("{}/", archive_path))?;
        } else if file_type.is_file() {
            let file = File::open(entry.path())?;
            let metadata = file.metadata()?;
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(metadata.len());
            header.set_mode(STAGED_FILE_MODE);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(mtime_secs(&metadata));
            builder.append_data(&mut header, &archive_path, file)?;
        } else {
            log::debug!("Skipping non-regular staged entry {}", archive_path);
        }
    }
    Ok(())
}

fn dir_header() -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(STAGED_DIR_MODE);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

fn mtime_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Pack an image build context, keeping the files' own permissions.
pub fn pack_build_context(dir: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

/// Read the regular files of `archive` whose path satisfies `select`.
///
/// A corrupt archive is an error. A single entry whose payload cannot be
/// read is logged and skipped.
pub fn unpack_files<F>(archive: &[u8], mut select: F) -> io::Result<Vec<ArchiveFile>>
where
    F: FnMut(&str) -> bool,
{
    let mut reader = tar::Archive::new(archive);
    let mut files = Vec::new();

    for entry in reader.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        if !select(&path) {
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        match entry.read_to_end(&mut data) {
            Ok(_) => files.push(ArchiveFile { path, data }),
            Err(e) => log::warn!("Failed to read archive entry {}: {}", path, e),
        }
    }

    Ok(files)
}
