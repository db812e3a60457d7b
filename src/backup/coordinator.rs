// backuptest/src/backup/coordinator.rs
use std::future::Future;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::backup::Toolkit;
use crate::backup::db_dump::dump_file_name;
use crate::backup::events::RunEvent;
use crate::backup::models::{
    AppTarget, ArchiveArtifact, Category, CategoryReport, DatabaseTarget,
};
use crate::backup::worker::{ensure_dir, run_app_worker, run_db_worker};
use crate::config::TestSelection;
use crate::errors::{BackupError, Result};

/// Drains every worker in the set and folds the outcomes into one report.
/// A failed worker does not cancel its siblings.
async fn collect_worker_results(
    category: Category,
    mut workers: JoinSet<Result<ArchiveArtifact>>,
) -> CategoryReport {
    let mut report = CategoryReport::new(category);

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(artifact)) => report.artifacts.push(artifact),
            Ok(Err(err)) => report.failures.push(err),
            Err(join_err) => {
                error!("{} worker task did not complete: {}", category, join_err);
                report
                    .failures
                    .push(BackupError::WorkerPanicked(join_err.to_string()));
            }
        }
    }

    report
}

/// Adds a worker to the set. The worker runs as its own task so a panic
/// inside it still reaches the observer as a `WorkerFailed` for `target`.
fn spawn_worker<F>(
    workers: &mut JoinSet<Result<ArchiveArtifact>>,
    category: Category,
    target: String,
    toolkit: &Toolkit,
    worker: F,
) where
    F: Future<Output = Result<ArchiveArtifact>> + Send + 'static,
{
    let observer = Arc::clone(&toolkit.observer);
    workers.spawn(async move {
        match tokio::spawn(worker).await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                error!("{} worker for '{}' did not complete: {}", category, target, join_err);
                observer.record(RunEvent::WorkerFailed {
                    category,
                    target: target.clone(),
                });
                Err(BackupError::WorkerPanicked(format!("{} ({})", target, join_err)))
            }
        }
    });
}

fn skip_category(category: Category, toolkit: &Toolkit) -> CategoryReport {
    info!("[INFO] Excluding {} from this test", category);
    toolkit.observer.record(RunEvent::CategorySkipped(category));
    CategoryReport::skipped(category)
}

/// Archives every sampled application directory concurrently.
pub async fn run_app_category(
    selection: &TestSelection<AppTarget>,
    dest_root: &Path,
    toolkit: &Toolkit,
) -> CategoryReport {
    if selection.excluded {
        return skip_category(Category::App, toolkit);
    }

    let mut workers = JoinSet::new();
    for target in selection.targets.iter().cloned() {
        let name = target.dir_name.clone();
        let worker = run_app_worker(target, dest_root.to_path_buf(), toolkit.clone());
        spawn_worker(&mut workers, Category::App, name, toolkit, worker);
    }

    collect_worker_results(Category::App, workers).await
}

/// Dumps and archives every sampled database concurrently, then removes the
/// dump files from the shared scratch directory.
///
/// Cleanup only starts once every worker has finished its own dump and
/// archive steps.
pub async fn run_db_category(
    selection: &TestSelection<DatabaseTarget>,
    dest_root: &Path,
    scratch_dir: &Path,
    toolkit: &Toolkit,
) -> CategoryReport {
    if selection.excluded {
        return skip_category(Category::Db, toolkit);
    }

    if let Err(err) = ensure_dir(scratch_dir).await {
        error!("Cannot prepare scratch directory: {}", err);
        let mut report = CategoryReport::new(Category::Db);
        report.failures.push(err);
        return report;
    }

    let mut workers = JoinSet::new();
    for target in selection.targets.iter().cloned() {
        let name = target.name.clone();
        let worker = run_db_worker(
            target,
            dest_root.to_path_buf(),
            scratch_dir.to_path_buf(),
            toolkit.clone(),
        );
        spawn_worker(&mut workers, Category::Db, name, toolkit, worker);
    }

    // Join barrier: the set is fully drained before cleanup runs.
    let mut report = collect_worker_results(Category::Db, workers).await;

    let (removed, cleanup_errors) = remove_dump_files(&selection.targets, scratch_dir).await;
    toolkit
        .observer
        .record(RunEvent::CleanupFinished { removed });
    for err in cleanup_errors {
        error!("Failed to delete dumped database: {}", err);
        report.failures.push(err);
    }

    report
}

/// Deletes the dump file of every sampled target, including targets whose
/// worker failed part-way. Missing files are not an error.
async fn remove_dump_files(
    targets: &[DatabaseTarget],
    scratch_dir: &Path,
) -> (usize, Vec<BackupError>) {
    let mut removed = 0;
    let mut errors = Vec::new();

    for target in targets {
        let path = scratch_dir.join(dump_file_name(target));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No dump file to delete for '{}' at {}", target.name, path.display());
            }
            Err(source) => errors.push(BackupError::Cleanup { path, source }),
        }
    }

    (removed, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::{TarGzArchiver, list_archive_entries};
    use crate::backup::db_dump::{DumpCommand, DumpExecutor};
    use crate::backup::events::RecordingObserver;
    use crate::backup::models::EngineKind;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Writes the dump file after a per-database delay; fails for listed databases.
    #[derive(Default)]
    struct FakeDumper {
        delays_ms: Vec<(String, u64)>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl DumpExecutor for FakeDumper {
        async fn execute(&self, command: &DumpCommand, database: &str, scratch_dir: &Path) -> Result<()> {
            let delay = self
                .delays_ms
                .iter()
                .find(|(name, _)| name == database)
                .map_or(0, |(_, ms)| *ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            if self.failing.contains(database) {
                // Leave a partial dump behind like a real tool would.
                let _ = tokio::fs::write(scratch_dir.join(&command.output_file), "partial").await;
                return Err(BackupError::DumpExecution {
                    database: database.to_string(),
                    output: "Access denied".to_string(),
                });
            }
            tokio::fs::write(
                scratch_dir.join(&command.output_file),
                format!("-- dump of {}\n", database),
            )
            .await
            .map_err(|e| BackupError::DumpExecution {
                database: database.to_string(),
                output: e.to_string(),
            })
        }
    }

    /// Panics for one database and writes a normal dump for every other one.
    struct PanickingDumper {
        panics_for: String,
    }

    #[async_trait]
    impl DumpExecutor for PanickingDumper {
        async fn execute(&self, command: &DumpCommand, database: &str, scratch_dir: &Path) -> Result<()> {
            if database == self.panics_for {
                panic!("dump tool wrapper crashed for {}", database);
            }
            FakeDumper::default().execute(command, database, scratch_dir).await
        }
    }

    fn toolkit(dumper: FakeDumper, observer: Arc<RecordingObserver>) -> Toolkit {
        Toolkit {
            archiver: Arc::new(TarGzArchiver),
            dumper: Arc::new(dumper),
            observer,
        }
    }

    fn db(name: &str) -> DatabaseTarget {
        DatabaseTarget {
            engine: EngineKind::Postgres,
            host: "localhost".to_string(),
            port: 5432,
            user: "backup".to_string(),
            password: "pw".to_string(),
            name: name.to_string(),
            dir_name: format!("{}-dir", name),
        }
    }

    fn selected<T>(targets: Vec<T>) -> TestSelection<T> {
        TestSelection {
            targets,
            excluded: false,
        }
    }

    fn app(root: &Path, name: &str) -> std::io::Result<AppTarget> {
        let app_dir = root.join("sources").join(name);
        std::fs::create_dir_all(&app_dir)?;
        std::fs::write(app_dir.join("main.txt"), name)?;
        Ok(AppTarget {
            app_dir,
            dir_name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn test_excluded_categories_spawn_no_workers() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let observer = Arc::new(RecordingObserver::default());
        let kit = toolkit(FakeDumper::default(), observer.clone());

        let app_report = run_app_category(&TestSelection::excluded(), root.path(), &kit).await;
        let db_report =
            run_db_category(&TestSelection::excluded(), root.path(), root.path(), &kit).await;

        assert!(app_report.skipped && app_report.verdict());
        assert!(db_report.skipped && db_report.verdict());
        assert_eq!(
            observer.events(),
            vec![
                RunEvent::CategorySkipped(Category::App),
                RunEvent::CategorySkipped(Category::Db)
            ]
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_app_category_spawns_one_worker_per_sampled_target() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("backups/app");
        let targets = vec![app(root.path(), "blog")?, app(root.path(), "shop")?];
        let observer = Arc::new(RecordingObserver::default());
        let kit = toolkit(FakeDumper::default(), observer.clone());

        let report = run_app_category(&selected(targets), &dest, &kit).await;

        assert!(report.verdict(), "{:?}", report.failures);
        assert_eq!(report.artifacts.len(), 2);
        assert_eq!(
            observer.count(|e| matches!(e, RunEvent::WorkerStarted { category: Category::App, .. })),
            2
        );
        for artifact in &report.artifacts {
            assert_eq!(artifact.category, Category::App);
            assert!(artifact.path.starts_with(dest.join(&artifact.target)));
            assert_eq!(list_archive_entries(&artifact.path)?, vec!["main.txt"]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_app_category_reports_missing_source_without_stopping_siblings() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("backups/app");
        let good = app(root.path(), "blog")?;
        let missing = AppTarget {
            app_dir: root.path().join("does-not-exist"),
            dir_name: "ghost".to_string(),
        };
        let kit = toolkit(FakeDumper::default(), Arc::new(RecordingObserver::default()));

        let report = run_app_category(&selected(vec![missing, good]), &dest, &kit).await;

        assert!(!report.verdict());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], BackupError::Archive { .. }));
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].target, "blog");
        Ok(())
    }

    #[tokio::test]
    async fn test_app_category_fails_when_destination_cannot_be_created() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let blocked = root.path().join("not-a-dir");
        std::fs::write(&blocked, "file")?;
        let kit = toolkit(FakeDumper::default(), Arc::new(RecordingObserver::default()));

        let report =
            run_app_category(&selected(vec![app(root.path(), "blog")?]), &blocked, &kit).await;

        assert!(!report.verdict());
        assert!(matches!(report.failures[0], BackupError::DirectoryCreation { .. }));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_archive_completes_before_cleanup() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("backups/db");
        let scratch = root.path().join("scratch");
        let dumper = FakeDumper {
            delays_ms: vec![
                ("slow".to_string(), 300),
                ("medium".to_string(), 120),
                ("fast".to_string(), 0),
            ],
            failing: HashSet::new(),
        };
        let observer = Arc::new(RecordingObserver::default());
        let kit = toolkit(dumper, observer.clone());

        let report = run_db_category(
            &selected(vec![db("slow"), db("medium"), db("fast")]),
            &dest,
            &scratch,
            &kit,
        )
        .await;

        assert!(report.verdict(), "{:?}", report.failures);
        assert_eq!(report.artifacts.len(), 3);

        let events = observer.events();
        let cleanup_at = events
            .iter()
            .position(|e| matches!(e, RunEvent::CleanupFinished { .. }))
            .expect("cleanup event");
        assert_eq!(events[cleanup_at], RunEvent::CleanupFinished { removed: 3 });
        assert_eq!(cleanup_at, events.len() - 1);
        let archived_before_cleanup = events[..cleanup_at]
            .iter()
            .filter(|e| matches!(e, RunEvent::ArchiveFinished { category: Category::Db, .. }))
            .count();
        assert_eq!(archived_before_cleanup, 3);

        // Every dump made it into its archive and the scratch area is empty again.
        for artifact in &report.artifacts {
            assert_eq!(
                list_archive_entries(&artifact.path)?,
                vec![format!("dump_{}", artifact.target)]
            );
        }
        assert_eq!(std::fs::read_dir(&scratch)?.count(), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_failing_dump_fails_category_but_not_siblings() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("backups/db");
        let scratch = root.path().join("scratch");
        let dumper = FakeDumper {
            delays_ms: vec![("orders".to_string(), 150)],
            failing: HashSet::from(["billing".to_string()]),
        };
        let kit = toolkit(dumper, Arc::new(RecordingObserver::default()));

        let report = run_db_category(
            &selected(vec![db("users"), db("billing"), db("orders")]),
            &dest,
            &scratch,
            &kit,
        )
        .await;

        assert!(!report.verdict());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            BackupError::DumpExecution { database, .. } if database == "billing"
        ));

        let mut archived: Vec<&str> = report.artifacts.iter().map(|a| a.target.as_str()).collect();
        archived.sort();
        assert_eq!(archived, vec!["orders", "users"]);
        for artifact in &report.artifacts {
            assert!(artifact.path.is_file());
        }
        // The partial dump of the failed database is cleaned up too.
        assert_eq!(std::fs::read_dir(&scratch)?.count(), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_worker_is_reported_with_its_target() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let dest = root.path().join("backups/db");
        let scratch = root.path().join("scratch");
        let observer = Arc::new(RecordingObserver::default());
        let kit = Toolkit {
            archiver: Arc::new(TarGzArchiver),
            dumper: Arc::new(PanickingDumper {
                panics_for: "billing".to_string(),
            }),
            observer: observer.clone(),
        };

        let report =
            run_db_category(&selected(vec![db("users"), db("billing")]), &dest, &scratch, &kit).await;

        assert!(!report.verdict());
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            BackupError::WorkerPanicked(detail) if detail.starts_with("billing")
        ));
        assert_eq!(
            observer.count(|e| *e
                == RunEvent::WorkerFailed {
                    category: Category::Db,
                    target: "billing".to_string()
                }),
            1
        );
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].target, "users");
        assert_eq!(
            observer.events().last(),
            Some(&RunEvent::CleanupFinished { removed: 1 })
        );
        Ok(())
    }
}
