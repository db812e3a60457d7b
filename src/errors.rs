use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Failed to create directory {}: {source}", .path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid backup target: {0}")]
    InvalidTarget(String),

    #[error("Dump of database '{database}' failed: {output}")]
    DumpExecution { database: String, output: String },

    #[error("Dump of database '{database}' timed out after {after:?}")]
    DumpTimeout { database: String, after: Duration },

    #[error("Failed to archive {} into {}: {reason:#}", .source_path.display(), .dest.display())]
    Archive {
        source_path: PathBuf,
        dest: PathBuf,
        reason: anyhow::Error,
    },

    #[error("Failed to clean up {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker task did not complete: {0}")]
    WorkerPanicked(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;
