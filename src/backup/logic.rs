// backuptest/src/backup/logic.rs
use tracing::{error, info};

use crate::backup::Toolkit;
use crate::backup::coordinator::{run_app_category, run_db_category};
use crate::backup::models::{CategoryReport, RunReport};
use crate::config::TestBackupConfig;

/// Runs both categories side by side and waits for both to settle.
///
/// Neither category is cut short by a failure in the other; the verdict is
/// only known once every worker and the database cleanup have finished.
pub async fn perform_test_orchestration(config: &TestBackupConfig, toolkit: &Toolkit) -> RunReport {
    info!(
        "Starting test backup: {} app target(s), {} database target(s)",
        config.app.targets.len(),
        config.db.targets.len()
    );

    let (app, db) = tokio::join!(
        run_app_category(&config.app, &config.backup_app_dir, toolkit),
        run_db_category(
            &config.db,
            &config.backup_db_dir,
            &config.scratch_dir,
            toolkit
        ),
    );

    let report = RunReport { app, db };
    log_category_summary(&report.app);
    log_category_summary(&report.db);
    report
}

fn log_category_summary(report: &CategoryReport) {
    if report.skipped {
        return;
    }
    for artifact in &report.artifacts {
        info!(
            "[ARCHIVE] {} '{}' -> {}",
            artifact.category,
            artifact.target,
            artifact.path.display()
        );
    }
    if report.verdict() {
        info!(
            "{} backup test passed ({} archive(s))",
            report.category,
            report.artifacts.len()
        );
    } else {
        error!(
            "{} backup test failed: {} failure(s), {} archive(s) produced",
            report.category,
            report.failures.len(),
            report.artifacts.len()
        );
    }
}
