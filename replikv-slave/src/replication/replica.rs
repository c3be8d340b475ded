use super::config::{FailoverConfig, ReplicationConfig};
use super::control::{ControlError, ControlRegistry};
use super::failover::{Attempt, FailoverController};
use super::protocol::{MasterConnector, MasterLink};
use super::script::{FailoverCallback, RecoveryScript};
use super::types::{
    FailoverStatus, MasterEvent, ReplicationError, ReplicationOperation, ReplicationResult,
};
use crate::core::error::QueryError;
use crate::core::store::ReplicaStore;
use crate::core::types::{Query, QueryResponse};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Slave Node - follows a master and fails over when it disappears
///
/// Features:
/// - Connects to master on startup
/// - Applies the master's write stream to the local store
/// - Reconnects with exponential backoff
/// - Gives up on flapping masters until reset by an operator
/// - Serves queries according to the failover controller
pub struct SlaveNode {
    controller: Arc<FailoverController>,
    store: Arc<dyn ReplicaStore>,
    registry: ControlRegistry,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SlaveNode {
    /// Create a slave node and spawn its replication loop
    ///
    /// The recovery script from `failover` (if any) is used as the failover
    /// callback. Must be called from within a tokio runtime.
    pub fn start(
        replication: ReplicationConfig,
        failover: FailoverConfig,
        store: Arc<dyn ReplicaStore>,
        connector: Arc<dyn MasterConnector>,
    ) -> ReplicationResult<Arc<Self>> {
        let callback = failover
            .recovery_script
            .clone()
            .map(|path| Arc::new(RecoveryScript::new(path)) as Arc<dyn FailoverCallback>);

        Self::start_with_callback(replication, failover, store, connector, callback)
    }

    pub fn start_with_callback(
        replication: ReplicationConfig,
        failover: FailoverConfig,
        store: Arc<dyn ReplicaStore>,
        connector: Arc<dyn MasterConnector>,
        callback: Option<Arc<dyn FailoverCallback>>,
    ) -> ReplicationResult<Arc<Self>> {
        replication
            .validate()
            .map_err(ReplicationError::InvalidConfig)?;
        failover
            .give_up
            .validate()
            .map_err(ReplicationError::InvalidConfig)?;

        info!(
            "Initializing slave node, master: {}:{}",
            replication.master_host, replication.master_port
        );

        let controller = Arc::new(FailoverController::new(replication, failover, callback));

        let run_loop = RunLoop {
            controller: Arc::clone(&controller),
            store: Arc::clone(&store),
            connector,
        };
        let task = tokio::spawn(run_loop.run());

        Ok(Arc::new(Self {
            controller,
            store,
            registry: ControlRegistry::default(),
            task: Mutex::new(Some(task)),
        }))
    }

    pub fn controller(&self) -> &Arc<FailoverController> {
        &self.controller
    }

    pub fn registry(&self) -> &ControlRegistry {
        &self.registry
    }

    /// Answer a client query if the current serving mode allows it
    pub fn serve_query(&self, query: Query) -> Result<QueryResponse, QueryError> {
        self.controller.check_query(query.kind())?;
        self.store.serve_query(&query)
    }

    /// Run a named operator control
    pub fn control<S: AsRef<str>>(
        &self,
        name: &str,
        args: &[S],
    ) -> Result<String, ControlError> {
        self.registry.dispatch(&self.controller, name, args)
    }

    pub fn status(&self) -> FailoverStatus {
        self.controller.status()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the replication loop and wait for it to exit
    pub async fn shutdown(&self) {
        self.controller.begin_shutdown();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Replication task ended abnormally: {}", e);
            }
            info!("Slave node stopped");
        }
    }
}

impl Drop for SlaveNode {
    /// Stops the loop. On a multi-threaded runtime this blocks until the loop
    /// has exited; elsewhere the task is aborted.
    fn drop(&mut self) {
        self.controller.begin_shutdown();

        let Some(task) = self.task.get_mut().take() else {
            return;
        };
        if task.is_finished() {
            return;
        }

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| {
                    if let Err(e) = handle.block_on(task) {
                        warn!("Replication task ended abnormally: {}", e);
                    }
                });
                debug!("Slave node dropped, replication loop exited");
            }
            // current_thread cannot block on its own tasks
            _ => task.abort(),
        }
    }
}

/// Why a replication stream ended
enum LinkEnd {
    Closed,
    Failed(ReplicationError),
    Interrupted,
}

/// The long-lived replication task
struct RunLoop {
    controller: Arc<FailoverController>,
    store: Arc<dyn ReplicaStore>,
    connector: Arc<dyn MasterConnector>,
}

impl RunLoop {
    async fn run(self) {
        info!("Replication loop started");

        loop {
            match self.controller.next_attempt() {
                Attempt::Stop => break,
                Attempt::GiveUp => {
                    // Only an operator command or shutdown wakes us up
                    let _ = self.suspend(std::future::pending::<()>()).await;
                    continue;
                }
                Attempt::After(delay) => {
                    debug!("Reconnecting in {:?}", delay);
                    if self.suspend(tokio::time::sleep(delay)).await.is_none() {
                        continue;
                    }
                }
                Attempt::Now => {}
            }

            let target = self.controller.master_target();
            let offset = self.controller.applied_offset();

            let link = match self.suspend(self.connector.connect(&target, offset)).await {
                None => continue,
                Some(Ok(link)) => link,
                Some(Err(e)) => {
                    warn!("Could not connect to master {}: {}", target, e);
                    self.controller.on_failure();
                    continue;
                }
            };

            // An operator command that landed while connecting retargets first
            if self.controller.interrupt_pending() {
                debug!("Dropping fresh link to {}, operator command pending", target);
                drop(link);
                continue;
            }

            self.controller.on_resume();

            match self.replicate(link).await {
                LinkEnd::Closed => info!("Master {} closed the replication stream", target),
                LinkEnd::Failed(e) => warn!("Replication from master {} failed: {}", target, e),
                LinkEnd::Interrupted => info!("Replication from master {} interrupted", target),
            }

            if self.controller.is_shutting_down() {
                break;
            }
            self.controller.on_failure();
        }

        info!("Replication loop stopped");
    }

    /// Stream operations until the link ends or we are interrupted
    async fn replicate(&self, mut link: Box<dyn MasterLink>) -> LinkEnd {
        loop {
            match self.suspend(link.next_event()).await {
                None => return LinkEnd::Interrupted,
                Some(Ok(None)) => return LinkEnd::Closed,
                Some(Err(e)) => return LinkEnd::Failed(e),
                Some(Ok(Some(MasterEvent::Heartbeat { master_offset }))) => {
                    self.controller.record_master_offset(master_offset);
                }
                Some(Ok(Some(MasterEvent::Operation(op)))) => {
                    if let Err(e) = self.apply_operation(op) {
                        return LinkEnd::Failed(e);
                    }
                }
            }
        }
    }

    /// Apply a single replication operation
    fn apply_operation(&self, op: ReplicationOperation) -> ReplicationResult<()> {
        debug!("Applying operation at offset {}", op.offset);

        let expected_offset = self.controller.applied_offset();
        if op.offset != expected_offset {
            warn!(
                "Offset mismatch: expected {}, got {}",
                expected_offset, op.offset
            );
        }

        self.store.apply(&op.operation).map_err(|e| {
            error!("Failed to apply operation at offset {}: {}", op.offset, e);
            ReplicationError::Store {
                offset: op.offset,
                reason: e.to_string(),
            }
        })?;

        self.controller.record_applied(op.offset + 1);
        Ok(())
    }

    /// Await `fut` unless shutdown or an operator command interrupts it
    ///
    /// The wait handle is registered before checking for pending interrupts,
    /// so a signal sent in between is never lost.
    async fn suspend<F: Future>(&self, fut: F) -> Option<F::Output> {
        let handle = self.controller.interrupter().register();
        if self.controller.interrupt_pending() {
            return None;
        }

        tokio::select! {
            biased;
            _ = handle.interrupted() => None,
            output = fut => Some(output),
        }
    }
}
