// backuptest/src/backup/db_dump.rs
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use url::Url;
use which::which;

use crate::backup::models::{DatabaseTarget, EngineKind};
use crate::errors::{BackupError, Result};

const MARIADB_DUMP: &str = "mariadb-dump";
const PG_DUMP: &str = "pg_dump";
const DUMP_FILE_PREFIX: &str = "dump_";
const MASK: &str = "******";

/// A dump tool invocation as an argument vector. Nothing here goes through a
/// shell, so credentials are passed verbatim.
#[derive(Clone, PartialEq, Eq)]
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
    /// File the tool writes, relative to the scratch directory it runs in.
    pub output_file: String,
    secret: Option<String>,
}

impl DumpCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_file: impl Into<String>) -> Self {
        DumpCommand {
            program: program.into(),
            args,
            output_file: output_file.into(),
            secret: None,
        }
    }

    fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }
}

/// Renders the command line with the password masked.
impl fmt::Display for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            match &self.secret {
                Some(secret) => write!(f, " {}", arg.replace(secret.as_str(), MASK))?,
                None => write!(f, " {}", arg)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DumpCommand({})", self)
    }
}

/// Deterministic dump file name for a database.
pub fn dump_file_name(db: &DatabaseTarget) -> String {
    format!("{}{}", DUMP_FILE_PREFIX, db.name)
}

/// Builds the dump invocation for the target's engine.
pub fn build_dump_command(db: &DatabaseTarget) -> Result<DumpCommand> {
    match db.engine {
        EngineKind::MariaDb => Ok(build_mariadb_command(db)),
        EngineKind::Postgres => build_postgres_command(db),
    }
}

// mariadb-dump <db> -h <host> -P <port> -u <user> -p<password> --result-file=<out>
fn build_mariadb_command(db: &DatabaseTarget) -> DumpCommand {
    let output_file = dump_file_name(db);
    let mut args = vec![
        db.name.clone(),
        "-h".to_string(),
        db.host.clone(),
        "-P".to_string(),
        db.port.to_string(),
        "-u".to_string(),
        db.user.clone(),
    ];
    // A bare `-p` would make the tool prompt on the terminal.
    if !db.password.is_empty() {
        args.push(format!("-p{}", db.password));
    }
    args.push(format!("--result-file={}", output_file));

    DumpCommand::new(MARIADB_DUMP, args, output_file).with_secret(Some(db.password.clone()))
}

// pg_dump -w --dbname=postgresql://<user>:<password>@<host>:<port>/<db> -f <out>
// `-w` makes pg_dump fail instead of prompting when the credentials are rejected.
fn build_postgres_command(db: &DatabaseTarget) -> Result<DumpCommand> {
    let uri = postgres_uri(db)?;
    let output_file = dump_file_name(db);
    let args = vec![
        "-w".to_string(),
        format!("--dbname={}", uri),
        "-f".to_string(),
        output_file.clone(),
    ];
    let secret = uri.password().map(str::to_string);

    Ok(DumpCommand::new(PG_DUMP, args, output_file).with_secret(secret))
}

/// Connection URI with percent-encoded credentials and database name.
fn postgres_uri(db: &DatabaseTarget) -> Result<Url> {
    let host = if db.host.contains(':') && !db.host.starts_with('[') {
        format!("[{}]", db.host)
    } else {
        db.host.clone()
    };
    let invalid = |what: &str| {
        BackupError::InvalidTarget(format!(
            "cannot build connection URI for database '{}': invalid {}",
            db.name, what
        ))
    };

    let mut uri = Url::parse(&format!("postgresql://{}:{}", host, db.port))
        .map_err(|e| invalid(&format!("host '{}' ({})", db.host, e)))?;
    uri.set_username(&db.user).map_err(|_| invalid("user"))?;
    if !db.password.is_empty() {
        uri.set_password(Some(&db.password))
            .map_err(|_| invalid("password"))?;
    }
    uri.path_segments_mut()
        .map_err(|_| invalid("database name"))?
        .push(&db.name);
    Ok(uri)
}

/// Runs a dump command inside the scratch directory.
#[async_trait]
pub trait DumpExecutor: Send + Sync {
    async fn execute(&self, command: &DumpCommand, database: &str, scratch_dir: &Path) -> Result<()>;
}

/// Spawns the dump tool as a child process, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct ProcessDumpExecutor {
    timeout: Duration,
}

impl ProcessDumpExecutor {
    pub fn new(timeout: Duration) -> Self {
        ProcessDumpExecutor { timeout }
    }
}

fn find_dump_executable(program: &str, database: &str) -> Result<PathBuf> {
    which(program).map_err(|e| BackupError::DumpExecution {
        database: database.to_string(),
        output: format!(
            "{} executable not found in PATH ({}). Please ensure the database client tools are installed.",
            program, e
        ),
    })
}

#[async_trait]
impl DumpExecutor for ProcessDumpExecutor {
    async fn execute(&self, command: &DumpCommand, database: &str, scratch_dir: &Path) -> Result<()> {
        let program = find_dump_executable(&command.program, database)?;

        let mut child = Command::new(&program);
        child
            .args(&command.args)
            .current_dir(scratch_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Dropping the `output()` future on timeout kills the child.
        let output = match timeout(self.timeout, child.output()).await {
            Ok(result) => result.map_err(|e| BackupError::DumpExecution {
                database: database.to_string(),
                output: format!("Failed to execute {}: {}", program.display(), e),
            })?,
            Err(_) => {
                return Err(BackupError::DumpTimeout {
                    database: database.to_string(),
                    after: self.timeout,
                });
            }
        };

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(BackupError::DumpExecution {
                database: database.to_string(),
                output: format!("{} exited with {}: {}", command.program, output.status, combined.trim()),
            });
        }
        Ok(())
    }
}
