pub(crate) mod archive;
pub(crate) mod coordinator;
pub(crate) mod db_dump;
pub(crate) mod events;
mod logic;
pub(crate) mod models;
pub(crate) mod worker;

use std::sync::Arc;
use std::time::Duration;

use crate::config::TestBackupConfig;
use archive::{Archiver, TarGzArchiver};
use db_dump::{DumpExecutor, ProcessDumpExecutor};
use events::{RunObserver, TracingObserver};
use models::RunReport;

/// The collaborators a test run works through.
#[derive(Clone)]
pub struct Toolkit {
    pub archiver: Arc<dyn Archiver>,
    pub dumper: Arc<dyn DumpExecutor>,
    pub observer: Arc<dyn RunObserver>,
}

impl Toolkit {
    pub fn production(dump_timeout: Duration) -> Self {
        Toolkit {
            archiver: Arc::new(TarGzArchiver),
            dumper: Arc::new(ProcessDumpExecutor::new(dump_timeout)),
            observer: Arc::new(TracingObserver),
        }
    }
}

/// Public entry point for a test backup run with the real dump tools and archiver.
pub async fn run_test_flow(config: &TestBackupConfig) -> RunReport {
    let toolkit = Toolkit::production(config.dump_timeout);
    logic::perform_test_orchestration(config, &toolkit).await
}
