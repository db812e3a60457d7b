// backuptest/src/backup/worker.rs
//
// Per-target workers. Each worker reports its own artifact or error back to
// the coordinator that spawned it; nothing here terminates the process.
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::DirBuilder;
use tracing::{debug, error, info};

use crate::backup::Toolkit;
use crate::backup::archive::{Archiver, archive_file_name};
use crate::backup::db_dump::build_dump_command;
use crate::backup::events::RunEvent;
use crate::backup::models::{AppTarget, ArchiveArtifact, Category, DatabaseTarget};
use crate::errors::{BackupError, Result};

/// Creates `path` and its parents, owner and group access only.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o770);
    builder
        .create(path)
        .await
        .map_err(|source| BackupError::DirectoryCreation {
            path: path.to_path_buf(),
            source,
        })
}

enum ArchiveSource {
    Dir(PathBuf),
    File(PathBuf),
}

async fn archive_blocking(
    archiver: Arc<dyn Archiver>,
    source: ArchiveSource,
    dest: PathBuf,
    target: &str,
) -> Result<PathBuf> {
    let source_path = match &source {
        ArchiveSource::Dir(path) | ArchiveSource::File(path) => path.clone(),
    };
    let archive_dest = dest.clone();

    let archived = tokio::task::spawn_blocking(move || match &source {
        ArchiveSource::Dir(path) => archiver.archive_dir(path, &archive_dest),
        ArchiveSource::File(path) => archiver.archive_file(path, &archive_dest),
    })
    .await
    .map_err(|e| BackupError::WorkerPanicked(format!("{} ({})", target, e)))?;

    archived.map_err(|reason| BackupError::Archive {
        source_path,
        dest,
        reason,
    })
}

/// Archives one application directory into
/// `<dest_root>/<dir_name>/app_<dir_name>_<timestamp>.tar.gz`.
pub async fn run_app_worker(
    target: AppTarget,
    dest_root: PathBuf,
    toolkit: Toolkit,
) -> Result<ArchiveArtifact> {
    toolkit.observer.record(RunEvent::WorkerStarted {
        category: Category::App,
        target: target.dir_name.clone(),
    });

    let outcome = app_backup_steps(&target, &dest_root, &toolkit).await;
    if let Err(e) = &outcome {
        error!("Failed to back up app '{}' ({}): {}", target.dir_name, target.app_dir.display(), e);
        toolkit.observer.record(RunEvent::WorkerFailed {
            category: Category::App,
            target: target.dir_name.clone(),
        });
    }
    outcome
}

async fn app_backup_steps(
    target: &AppTarget,
    dest_root: &Path,
    toolkit: &Toolkit,
) -> Result<ArchiveArtifact> {
    let backup_dir = dest_root.join(&target.dir_name);
    ensure_dir(&backup_dir).await?;

    info!("[START] zipping in '{}'", target.app_dir.display());
    let archive_path =
        backup_dir.join(archive_file_name(Category::App, &target.dir_name, &Local::now()));
    let archived = archive_blocking(
        Arc::clone(&toolkit.archiver),
        ArchiveSource::Dir(target.app_dir.clone()),
        archive_path,
        &target.dir_name,
    )
    .await?;
    info!("[DONE] zipping '{}'", target.dir_name);

    toolkit.observer.record(RunEvent::ArchiveFinished {
        category: Category::App,
        target: target.dir_name.clone(),
    });
    Ok(ArchiveArtifact {
        path: archived,
        category: Category::App,
        target: target.dir_name.clone(),
    })
}

/// Dumps one database into the scratch directory, then archives the dump
/// into `<dest_root>/<dir_name>/database_<name>_<timestamp>.tar.gz`. The dump
/// file itself is left for the category's cleanup step.
pub async fn run_db_worker(
    target: DatabaseTarget,
    dest_root: PathBuf,
    scratch_dir: PathBuf,
    toolkit: Toolkit,
) -> Result<ArchiveArtifact> {
    toolkit.observer.record(RunEvent::WorkerStarted {
        category: Category::Db,
        target: target.name.clone(),
    });

    let outcome = db_backup_steps(&target, &dest_root, &scratch_dir, &toolkit).await;
    if let Err(e) = &outcome {
        error!("Failed to back up database '{}': {}", target.name, e);
        toolkit.observer.record(RunEvent::WorkerFailed {
            category: Category::Db,
            target: target.name.clone(),
        });
    }
    outcome
}

async fn db_backup_steps(
    target: &DatabaseTarget,
    dest_root: &Path,
    scratch_dir: &Path,
    toolkit: &Toolkit,
) -> Result<ArchiveArtifact> {
    let backup_dir = dest_root.join(&target.dir_name);
    ensure_dir(&backup_dir).await?;

    let command = build_dump_command(target)?;

    info!("[START] dumping database '{}'", target.name);
    debug!("Running `{}` in {}", command, scratch_dir.display());
    toolkit
        .dumper
        .execute(&command, &target.name, scratch_dir)
        .await?;
    info!("[DONE] dumping '{}'", target.name);
    toolkit.observer.record(RunEvent::DumpFinished {
        target: target.name.clone(),
    });

    info!("[START] zipping dumped database '{}'", target.name);
    let archive_path =
        backup_dir.join(archive_file_name(Category::Db, &target.name, &Local::now()));
    let archived = archive_blocking(
        Arc::clone(&toolkit.archiver),
        ArchiveSource::File(scratch_dir.join(&command.output_file)),
        archive_path,
        &target.name,
    )
    .await?;
    info!("[DONE] zipping '{}'", target.name);

    toolkit.observer.record(RunEvent::ArchiveFinished {
        category: Category::Db,
        target: target.name.clone(),
    });
    Ok(ArchiveArtifact {
        path: archived,
        category: Category::Db,
        target: target.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_dir_creates_nested_directories() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let nested = root.path().join("a/b/c");
        ensure_dir(&nested).await?;
        assert!(nested.is_dir());
        // Existing directories are fine.
        ensure_dir(&nested).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_dir_fails_below_a_file() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let file = root.path().join("occupied");
        std::fs::write(&file, "x")?;

        let err = ensure_dir(&file.join("sub")).await.unwrap_err();
        assert!(matches!(err, BackupError::DirectoryCreation { .. }), "{err}");
        Ok(())
    }
}
