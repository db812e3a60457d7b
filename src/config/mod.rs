// backuptest/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::backup::models::{AppTarget, DatabaseTarget};

const DEFAULT_DUMP_TIMEOUT_SECS: u64 = 300;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonAppSection {
    #[serde(default)]
    pub sample: usize,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default)]
    pub apps: Vec<AppTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonDbSection {
    #[serde(default)]
    pub sample: usize,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default)]
    pub databases: Vec<DatabaseTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub backup_app_dir: Option<PathBuf>,
    pub backup_db_dir: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub dump_timeout_secs: Option<u64>,
    pub app: Option<JsonAppSection>,
    pub db: Option<JsonDbSection>,
}

impl RawJsonConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })
    }
}

/// Category exclusions requested on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exclusions {
    pub no_app: bool,
    pub no_db: bool,
}

/// The sampled prefix of a category's configured targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSelection<T> {
    pub targets: Vec<T>,
    pub excluded: bool,
}

impl<T: Clone> TestSelection<T> {
    pub fn excluded() -> Self {
        TestSelection {
            targets: Vec::new(),
            excluded: true,
        }
    }

    /// Takes the first `sample` targets. Sampling nothing, or more than is
    /// configured, is rejected rather than clamped.
    pub fn from_targets(configured: &[T], sample: usize) -> Result<Self> {
        if configured.is_empty() {
            anyhow::bail!("no targets are configured");
        }
        if sample == 0 {
            anyhow::bail!("sample must be at least 1");
        }
        if sample > configured.len() {
            anyhow::bail!(
                "sample {} exceeds the {} configured targets",
                sample,
                configured.len()
            );
        }
        Ok(TestSelection {
            targets: configured[..sample].to_vec(),
            excluded: false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TestBackupConfig {
    pub backup_app_dir: PathBuf,
    pub backup_db_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub dump_timeout: Duration,
    pub app: TestSelection<AppTarget>,
    pub db: TestSelection<DatabaseTarget>,
}

fn required_dir(value: &Option<PathBuf>, key: &str) -> Result<PathBuf> {
    let dir = value
        .as_ref()
        .with_context(|| format!("{} must be set in config.json", key))?
        .clone();
    if dir.as_os_str().is_empty() {
        anyhow::bail!("{} cannot be empty in config.json.", key);
    }
    Ok(dir)
}

fn ensure_unique_dir_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            anyhow::bail!("dir_name cannot be empty");
        }
        if !seen.insert(name) {
            anyhow::bail!("dir_name '{}' is used by more than one target", name);
        }
    }
    Ok(())
}

/// Database names end up as file names in the shared scratch directory.
fn validate_database_names(databases: &[DatabaseTarget]) -> Result<()> {
    let mut seen = HashSet::new();
    for db in databases {
        if db.name.trim().is_empty()
            || db
                .name
                .contains(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-')
        {
            anyhow::bail!("Invalid database name in config: {:?}", db.name);
        }
        if !seen.insert(db.name.as_str()) {
            anyhow::bail!("database '{}' is listed more than once", db.name);
        }
    }
    Ok(())
}

fn load_app_selection(
    raw_config: &RawJsonConfig,
    exclusions: Exclusions,
) -> Result<(TestSelection<AppTarget>, PathBuf)> {
    let excluded = exclusions.no_app || raw_config.app.as_ref().is_some_and(|s| s.excluded);
    if excluded {
        return Ok((TestSelection::excluded(), PathBuf::new()));
    }

    let section = raw_config
        .app
        .as_ref()
        .context("app must be set in config.json (or exclude it with --no-app)")?;
    let backup_app_dir = required_dir(&raw_config.backup_app_dir, "backup_app_dir")?;
    ensure_unique_dir_names(section.apps.iter().map(|a| a.dir_name.as_str()))
        .context("Invalid app targets")?;
    let selection = TestSelection::from_targets(&section.apps, section.sample)
        .context("Invalid app sample")?;

    Ok((selection, backup_app_dir))
}

fn load_db_selection(
    raw_config: &RawJsonConfig,
    exclusions: Exclusions,
) -> Result<(TestSelection<DatabaseTarget>, PathBuf)> {
    let excluded = exclusions.no_db || raw_config.db.as_ref().is_some_and(|s| s.excluded);
    if excluded {
        return Ok((TestSelection::excluded(), PathBuf::new()));
    }

    let section = raw_config
        .db
        .as_ref()
        .context("db must be set in config.json (or exclude it with --no-db)")?;
    let backup_db_dir = required_dir(&raw_config.backup_db_dir, "backup_db_dir")?;
    ensure_unique_dir_names(section.databases.iter().map(|d| d.dir_name.as_str()))
        .context("Invalid database targets")?;
    validate_database_names(&section.databases).context("Invalid database targets")?;
    let selection = TestSelection::from_targets(&section.databases, section.sample)
        .context("Invalid database sample")?;

    Ok((selection, backup_db_dir))
}

pub fn load_test_config_from_json(
    raw_config: &RawJsonConfig,
    exclusions: Exclusions,
) -> Result<TestBackupConfig> {
    let (app, backup_app_dir) = load_app_selection(raw_config, exclusions)?;
    let (db, backup_db_dir) = load_db_selection(raw_config, exclusions)?;

    let scratch_dir = match &raw_config.scratch_dir {
        Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
        _ => std::env::temp_dir(),
    };

    let dump_timeout_secs = raw_config
        .dump_timeout_secs
        .unwrap_or(DEFAULT_DUMP_TIMEOUT_SECS);
    if dump_timeout_secs == 0 {
        anyhow::bail!("dump_timeout_secs must be greater than zero");
    }

    if app.excluded && db.excluded {
        warn!("Both app and database are excluded; the test has nothing to do");
    }

    Ok(TestBackupConfig {
        backup_app_dir,
        backup_db_dir,
        scratch_dir,
        dump_timeout: Duration::from_secs(dump_timeout_secs),
        app,
        db,
    })
}
