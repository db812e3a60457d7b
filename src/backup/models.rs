// backuptest/src/backup/models.rs
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

use crate::errors::BackupError;

/// The two backup kinds exercised by a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    App,
    Db,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::App => write!(f, "app"),
            Category::Db => write!(f, "database"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[serde(alias = "mysql")]
    MariaDb,
    #[serde(alias = "postgresql", alias = "pgsql")]
    Postgres,
}

/// An application directory to archive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppTarget {
    pub app_dir: PathBuf,
    pub dir_name: String,
}

/// A database to dump and archive.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseTarget {
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub name: String,
    pub dir_name: String,
}

// Keeps credentials out of `{:?}` log output.
impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"******")
            .field("name", &self.name)
            .field("dir_name", &self.dir_name)
            .finish()
    }
}

/// An archive produced by a worker. Archives are kept after the run; only
/// intermediate dump files are removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    pub path: PathBuf,
    pub category: Category,
    pub target: String,
}

/// Outcome of one category: every artifact produced and every failure seen.
#[derive(Debug)]
pub struct CategoryReport {
    pub category: Category,
    pub skipped: bool,
    pub artifacts: Vec<ArchiveArtifact>,
    pub failures: Vec<BackupError>,
}

impl CategoryReport {
    pub fn new(category: Category) -> Self {
        CategoryReport {
            category,
            skipped: false,
            artifacts: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn skipped(category: Category) -> Self {
        CategoryReport {
            skipped: true,
            ..CategoryReport::new(category)
        }
    }

    /// A skipped category counts as a pass.
    pub fn verdict(&self) -> bool {
        self.skipped || self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub app: CategoryReport,
    pub db: CategoryReport,
}

impl RunReport {
    pub fn verdict(&self) -> bool {
        self.app.verdict() && self.db.verdict()
    }
}
