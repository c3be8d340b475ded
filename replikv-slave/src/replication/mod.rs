/// Replication module - slave side of a master/slave link
///
/// Design inspired by Redis Replication:
/// - 1 Master node (accepts writes)
/// - Slave follows the master's write stream (read-only)
/// - Failover to standalone serving when the master is lost
/// - Exponential backoff between reconnects
/// - Give-up policy for masters that keep flapping
///
/// Operator controls:
/// - `failover_reset` - forget reconnect history, reconnect
/// - `new_master host port` - follow a different master
pub mod backoff;
pub mod config;
pub mod control;
pub mod failover;
pub mod give_up;
pub mod interrupt;
pub mod protocol;
pub mod replica;
pub mod script;
pub mod types;

pub use backoff::Backoff;
pub use config::{FailoverConfig, GiveUpConfig, ReplicationConfig};
pub use control::{AdminCommand, ControlError, ControlRegistry};
pub use failover::{Attempt, FailoverController};
pub use give_up::ReconnectTracker;
pub use interrupt::{Interrupter, WaitHandle};
pub use protocol::{MasterConnector, MasterLink, TcpMasterConnector};
pub use replica::SlaveNode;
pub use script::{FailoverCallback, RecoveryScript};
pub use types::{
    FailoverStatus, LinkState, MasterEvent, MasterTarget, ReplicationCommand, ReplicationError,
    ReplicationOperation, ReplicationResult, ServingMode,
};

#[cfg(test)]
mod tests;
