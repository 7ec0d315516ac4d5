//! Blocking archive extraction. Run these on a blocking task.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, ScanError};

fn archive_err(e: std::io::Error) -> ScanError {
    ScanError::Archive(e.to_string())
}

/// Unpack a gzip-compressed tarball into `dest`, keeping directory
/// structure. Only regular files and directories are written; entries that
/// would land outside `dest` are rejected.
pub(crate) fn unpack(
    archive_path: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<u64> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    fs::create_dir_all(dest)?;

    let mut written = 0u64;
    for entry in archive.entries().map_err(archive_err)? {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled("archive extraction".to_string()));
        }

        let mut entry = entry.map_err(archive_err)?;
        let kind = entry.header().entry_type();
        if !(kind.is_file() || kind.is_dir()) {
            continue;
        }

        let path = entry.path().map_err(archive_err)?.into_owned();
        if !is_contained(&path) {
            return Err(ScanError::Archive(format!(
                "entry escapes extraction root: {}",
                path.display()
            )));
        }

        if entry.unpack_in(dest).map_err(archive_err)? {
            written += 1;
        }
    }

    debug!(entries = written, dest = %dest.display(), "archive unpacked");
    Ok(written)
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Find the top-level directory a repository host puts in its tarballs,
/// named `{owner}-{repo}-{revision}`.
pub(crate) fn locate_repository_dir(
    extracted: &Path,
    owner: &str,
    repo: &str,
) -> Result<PathBuf> {
    let prefix = format!("{owner}-{repo}");
    let mut candidates = fs::read_dir(extracted)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| ScanError::EmptyRepository {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
}

#[cfg(test)]
pub(crate) mod testing {
    use flate2::{Compression, write::GzEncoder};

    /// Build a gzip tarball from `(path, contents)` pairs. A path ending in
    /// `/` becomes a directory entry.
    pub(crate) fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            if path.ends_with('/') {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                header.set_cksum();
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .unwrap();
            } else {
                header.set_size(contents.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, path, contents.as_bytes())
                    .unwrap();
            }
        }
        builder.into_inner().unwrap().finish().unwrap()
    }
}
