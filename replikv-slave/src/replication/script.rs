use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Hook notified when the slave loses and regains its master
pub trait FailoverCallback: Send + Sync {
    fn on_failure(&self);
    fn on_resume(&self);
}

/// Runs an external executable on failover transitions
///
/// The script gets a single argument, `down` when the master is lost and
/// `up` once replication resumes. It runs in the background and its outcome
/// never affects the replication state machine.
#[derive(Debug, Clone)]
pub struct RecoveryScript {
    path: PathBuf,
}

impl RecoveryScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn spawn(&self, event: &'static str) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    "No runtime available, skipping recovery script {:?} ({})",
                    self.path, event
                );
                return;
            }
        };

        let path = self.path.clone();
        handle.spawn(async move {
            debug!("Running recovery script {:?} {}", path, event);
            match Command::new(&path).arg(event).status().await {
                Ok(status) if status.success() => {
                    info!("Recovery script {:?} {} completed", path, event);
                }
                Ok(status) => {
                    warn!("Recovery script {:?} {} exited with {}", path, event, status);
                }
                Err(e) => {
                    warn!("Failed to run recovery script {:?}: {}", path, e);
                }
            }
        });
    }
}

impl FailoverCallback for RecoveryScript {
    fn on_failure(&self) {
        self.spawn("down");
    }

    fn on_resume(&self) {
        self.spawn("up");
    }
}
