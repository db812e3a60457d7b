// backuptest/src/backup/archive.rs
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::debug;
use walkdir::WalkDir;

use crate::backup::models::Category;

/// Second-precision timestamp with the weekday name, e.g. `2024-Mar-05_Tuesday_14:07:09`.
const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%b-%d_%A_%H:%M:%S";
const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Produces compressed archives. Implementations are blocking and are driven
/// from `spawn_blocking` by the workers.
pub trait Archiver: Send + Sync {
    /// Archives every entry below `source_dir`, with paths relative to it.
    fn archive_dir(&self, source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf>;

    /// Archives a single file, stored under its file name.
    fn archive_file(&self, source_file: &Path, archive_dest_path: &Path) -> Result<PathBuf>;
}

/// Builds `<category>_<target>_<timestamp>.tar.gz`, so archives from
/// different categories or targets never share a name even when they land in
/// the same directory within the same second.
pub fn archive_file_name<Tz: TimeZone>(
    category: Category,
    target: &str,
    now: &DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}_{}.{}",
        category,
        target,
        now.format(ARCHIVE_TIMESTAMP_FORMAT),
        ARCHIVE_EXTENSION
    )
}

/// GZipped TAR archives built with `tar` and `flate2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzArchiver;

impl TarGzArchiver {
    fn open_builder(archive_dest_path: &Path) -> Result<Builder<GzEncoder<File>>> {
        if let Some(parent) = archive_dest_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for archive: {}",
                        parent.display()
                    )
                })?;
            }
        }

        let archive_file = File::create(archive_dest_path).with_context(|| {
            format!(
                "Failed to create archive file: {}",
                archive_dest_path.display()
            )
        })?;
        Ok(Builder::new(GzEncoder::new(archive_file, Compression::default())))
    }

    fn finish(tar_builder: Builder<GzEncoder<File>>, archive_dest_path: &Path) -> Result<PathBuf> {
        let encoder = tar_builder.into_inner().with_context(|| {
            format!(
                "Failed to finish tar stream for archive: {}",
                archive_dest_path.display()
            )
        })?;
        encoder.finish().with_context(|| {
            format!(
                "Failed to finish Gzip encoding for archive: {}",
                archive_dest_path.display()
            )
        })?;

        debug!("Archive written to {}", archive_dest_path.display());
        Ok(archive_dest_path.to_path_buf())
    }
}

impl Archiver for TarGzArchiver {
    fn archive_dir(&self, source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
        if !source_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "Source for archival is not a directory: {}",
                source_dir.display()
            ));
        }

        let mut tar_builder = Self::open_builder(archive_dest_path)?;

        for entry in WalkDir::new(source_dir) {
            let entry = entry
                .with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
            let path = entry.path();
            let name = path.strip_prefix(source_dir).with_context(|| {
                format!(
                    "Failed to strip prefix {} from {}",
                    source_dir.display(),
                    path.display()
                )
            })?;

            if name.as_os_str().is_empty() {
                continue;
            }

            if entry.file_type().is_dir() {
                tar_builder.append_dir(name, path).with_context(|| {
                    format!("Failed to append directory {} to archive", path.display())
                })?;
            } else if entry.file_type().is_file() {
                tar_builder.append_path_with_name(path, name).with_context(|| {
                    format!(
                        "Failed to append file {} as {} to archive",
                        path.display(),
                        name.display()
                    )
                })?;
            }
        }

        Self::finish(tar_builder, archive_dest_path)
    }

    fn archive_file(&self, source_file: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
        if !source_file.is_file() {
            return Err(anyhow::anyhow!(
                "Source for archival is not a file: {}",
                source_file.display()
            ));
        }
        let name = source_file
            .file_name()
            .with_context(|| format!("Source file has no name: {}", source_file.display()))?;

        let mut tar_builder = Self::open_builder(archive_dest_path)?;
        tar_builder
            .append_path_with_name(source_file, name)
            .with_context(|| format!("Failed to append file {} to archive", source_file.display()))?;

        Self::finish(tar_builder, archive_dest_path)
    }
}

#[cfg(test)]
pub(crate) fn list_archive_entries(archive_path: &Path) -> Result<Vec<String>> {
    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(archive_file));
    let mut names = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        names.push(entry.path()?.to_string_lossy().trim_end_matches('/').to_string());
    }
    names.sort();
    Ok(names)
}
