// backuptest/src/backup/events.rs
use tracing::trace;

use crate::backup::models::Category;

/// Progress points emitted by workers and coordinators, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    CategorySkipped(Category),
    WorkerStarted { category: Category, target: String },
    DumpFinished { target: String },
    ArchiveFinished { category: Category, target: String },
    WorkerFailed { category: Category, target: String },
    CleanupFinished { removed: usize },
}

pub trait RunObserver: Send + Sync {
    fn record(&self, event: RunEvent);
}

/// Default observer: every event goes to the `trace` log level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn record(&self, event: RunEvent) {
        match event {
            RunEvent::CategorySkipped(category) => trace!("{} category skipped", category),
            RunEvent::WorkerStarted { category, target } => {
                trace!("{} worker started for '{}'", category, target)
            }
            RunEvent::DumpFinished { target } => trace!("dump finished for '{}'", target),
            RunEvent::ArchiveFinished { category, target } => {
                trace!("{} archive finished for '{}'", category, target)
            }
            RunEvent::WorkerFailed { category, target } => {
                trace!("{} worker failed for '{}'", category, target)
            }
            RunEvent::CleanupFinished { removed } => {
                trace!("scratch cleanup removed {} dump file(s)", removed)
            }
        }
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<RunEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&RunEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(*e)).count()
    }
}

#[cfg(test)]
impl RunObserver for RecordingObserver {
    fn record(&self, event: RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
