/// Failover controller - owns the slave's view of master health
///
/// Features:
/// - Serving mode switch (replica vs. failed over)
/// - Recovery hook on loss / resume of the master
/// - Reconnect scheduling (exponential backoff)
/// - Give-up policy for flapping masters
/// - Operator reset and master redirection
///
/// Every field that takes part in the state machine lives behind one mutex so
/// the run loop and operator commands always observe a consistent state.
use super::backoff::Backoff;
use super::config::{FailoverConfig, ReplicationConfig};
use super::control::{AdminCommand, ControlError};
use super::give_up::ReconnectTracker;
use super::interrupt::Interrupter;
use super::script::FailoverCallback;
use super::types::{FailoverStatus, LinkState, MasterTarget, ServingMode};
use crate::core::error::QueryError;
use crate::core::types::QueryKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the run loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Connect immediately
    Now,
    /// Sleep, then connect
    After(Duration),
    /// Stay disconnected until an operator intervenes
    GiveUp,
    /// Slave is shutting down
    Stop,
}

/// Pending operator request for the run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    /// Reconnect after the initial backoff delay
    Reset,
    /// Reconnect right away (new master)
    Redirect,
}

struct FailoverState {
    replication: ReplicationConfig,
    link_state: LinkState,
    serving_mode: ServingMode,
    tracker: ReconnectTracker,
    backoff: Backoff,
    directive: Option<Directive>,
    in_failure_episode: bool,
    attempted: bool,
    shutting_down: bool,
    total_failures: u64,
    last_failure_at: Option<DateTime<Utc>>,
    last_resume_at: Option<DateTime<Utc>>,
    /// Last offset the master advertised on the current link
    master_offset: Option<u64>,
}

impl FailoverState {
    fn queue(&mut self, directive: Directive) {
        self.directive = match (self.directive, directive) {
            (Some(Directive::Redirect), _) => Some(Directive::Redirect),
            (_, next) => Some(next),
        };
    }
}

/// Failover controller
pub struct FailoverController {
    state: Mutex<FailoverState>,
    failover: FailoverConfig,
    callback: Option<Arc<dyn FailoverCallback>>,
    interrupter: Arc<Interrupter>,
    applied_offset: AtomicU64,
}

impl FailoverController {
    pub fn new(
        replication: ReplicationConfig,
        failover: FailoverConfig,
        callback: Option<Arc<dyn FailoverCallback>>,
    ) -> Self {
        let mut tracker = ReconnectTracker::new(&failover.give_up);
        tracker.reset();

        Self {
            state: Mutex::new(FailoverState {
                backoff: Backoff::new(&replication),
                replication,
                link_state: LinkState::Retrying,
                // Nothing replicated yet, so we are not a live replica
                serving_mode: ServingMode::FailedOver,
                tracker,
                directive: None,
                in_failure_episode: false,
                attempted: false,
                shutting_down: false,
                total_failures: 0,
                last_failure_at: None,
                last_resume_at: None,
                master_offset: None,
            }),
            failover,
            callback,
            interrupter: Arc::new(Interrupter::new()),
            applied_offset: AtomicU64::new(0),
        }
    }

    pub fn interrupter(&self) -> &Arc<Interrupter> {
        &self.interrupter
    }

    /// Connection to the master was lost (or an attempt failed)
    pub fn on_failure(&self) {
        let (new_episode, target) = {
            let mut state = self.state.lock();
            state.serving_mode = ServingMode::FailedOver;
            if state.link_state != LinkState::GivenUp {
                state.link_state = LinkState::FailedOver;
            }
            state.total_failures += 1;
            state.last_failure_at = Some(Utc::now());
            state.master_offset = None;

            let new_episode = !state.in_failure_episode;
            state.in_failure_episode = true;
            (new_episode, state.replication.target())
        };

        if new_episode {
            if self.failover.serve_queries_while_failed_over {
                warn!("Lost contact with master {}, serving queries locally", target);
            } else {
                warn!("Lost contact with master {}, queries suspended", target);
            }
            if let Some(callback) = &self.callback {
                callback.on_failure();
            }
        } else {
            debug!("Master {} still unreachable", target);
        }
    }

    /// Connection to the master was re-established
    pub fn on_resume(&self) {
        let (episode_closed, target) = {
            let mut state = self.state.lock();
            state.serving_mode = ServingMode::Responding;
            state.link_state = LinkState::Connected;
            state.tracker.on_reconnect();
            state.backoff.reset();
            state.last_resume_at = Some(Utc::now());
            state.master_offset = None;

            let episode_closed = state.in_failure_episode;
            state.in_failure_episode = false;
            (episode_closed, state.replication.target())
        };

        info!("Replicating from master {}", target);

        if episode_closed {
            if let Some(callback) = &self.callback {
                callback.on_resume();
            }
        }
    }

    /// Decide when (and whether) the run loop reconnects
    pub fn next_attempt(&self) -> Attempt {
        let mut state = self.state.lock();

        if state.shutting_down {
            return Attempt::Stop;
        }

        if let Some(directive) = state.directive.take() {
            state.attempted = true;
            state.link_state = LinkState::Retrying;
            return match directive {
                Directive::Redirect => Attempt::Now,
                Directive::Reset => Attempt::After(state.backoff.next_delay()),
            };
        }

        if !state.attempted {
            state.attempted = true;
            state.link_state = LinkState::Retrying;
            return Attempt::Now;
        }

        if state.link_state == LinkState::GivenUp {
            return Attempt::GiveUp;
        }

        if self.failover.give_up.enabled && state.tracker.give_up() {
            state.link_state = LinkState::GivenUp;
            warn!(
                "Master {} reconnected {} times within {}s, giving up until failover is reset",
                state.replication.target(),
                state.tracker.recent(),
                self.failover.give_up.window_secs
            );
            return Attempt::GiveUp;
        }

        state.link_state = LinkState::Retrying;
        Attempt::After(state.backoff.next_delay())
    }

    /// Forget reconnect history and force a reconnection to the master
    pub fn failover_reset(&self) -> String {
        let target = {
            let mut state = self.state.lock();
            state.tracker.reset();
            state.backoff.reset();
            if state.link_state != LinkState::Connected {
                state.link_state = LinkState::Retrying;
            }
            state.queue(Directive::Reset);
            state.replication.target()
        };

        self.interrupter.pulse();
        info!("Failover state reset, reconnecting to master {}", target);

        format!("Failover state reset. Reconnecting to master {}.", target)
    }

    /// Validate `host port` and redirect replication to that master
    pub fn new_master<S: AsRef<str>>(&self, args: &[S]) -> String {
        match AdminCommand::parse_new_master(args) {
            Ok(command) => self.execute(command),
            Err(e) => {
                warn!("Rejected new_master: {}", e);
                format!("Error: {}", e)
            }
        }
    }

    /// Switch to a new master; the current connection is torn down
    pub fn redirect(&self, target: MasterTarget) -> String {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.replication.target();
            state.replication.set_target(target.clone());
            state.tracker.reset();
            state.backoff.reset();
            if state.link_state != LinkState::Connected {
                state.link_state = LinkState::Retrying;
            }
            state.queue(Directive::Redirect);
            previous
        };

        self.interrupter.pulse();
        info!("Master changed from {} to {}", previous, target);

        format!(
            "New master set to {}. Disconnecting from {} and reconnecting.",
            target, previous
        )
    }

    /// Run a parsed administrative command
    pub fn execute(&self, command: AdminCommand) -> String {
        match command {
            AdminCommand::FailoverReset => self.failover_reset(),
            AdminCommand::NewMaster { host, port } => {
                self.redirect(MasterTarget::new(host, port))
            }
        }
    }

    /// Whether a query of the given kind may run right now
    pub fn check_query(&self, kind: QueryKind) -> Result<(), QueryError> {
        match (self.serving_mode(), kind) {
            (ServingMode::Responding, QueryKind::Read) => Ok(()),
            (ServingMode::Responding, QueryKind::Write) => Err(QueryError::ReadOnlyReplica),
            (ServingMode::FailedOver, _) if self.failover.serve_queries_while_failed_over => Ok(()),
            (ServingMode::FailedOver, _) => Err(QueryError::Unavailable),
        }
    }

    pub fn begin_shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.interrupter.pulse();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Shutdown or an operator command is waiting for the run loop
    pub fn interrupt_pending(&self) -> bool {
        let state = self.state.lock();
        state.shutting_down || state.directive.is_some()
    }

    pub fn serving_mode(&self) -> ServingMode {
        self.state.lock().serving_mode
    }

    pub fn link_state(&self) -> LinkState {
        self.state.lock().link_state
    }

    pub fn master_target(&self) -> MasterTarget {
        self.state.lock().replication.target()
    }

    pub fn current_backoff(&self) -> Duration {
        self.state.lock().backoff.current()
    }

    pub fn record_applied(&self, offset: u64) {
        self.applied_offset.store(offset, Ordering::SeqCst);
    }

    pub fn applied_offset(&self) -> u64 {
        self.applied_offset.load(Ordering::SeqCst)
    }

    /// Remember the write offset from the master's latest heartbeat
    pub fn record_master_offset(&self, offset: u64) {
        self.state.lock().master_offset = Some(offset);
    }

    pub fn status(&self) -> FailoverStatus {
        let state = self.state.lock();
        let applied_offset = self.applied_offset();
        FailoverStatus {
            state: state.link_state,
            serving_mode: state.serving_mode,
            master: state.replication.target(),
            backoff_ms: state.backoff.current().as_millis() as u64,
            recent_reconnects: state.tracker.recent(),
            given_up: state.link_state == LinkState::GivenUp,
            total_failures: state.total_failures,
            applied_offset,
            master_offset: state.master_offset,
            lag: state
                .master_offset
                .map(|master| master.saturating_sub(applied_offset)),
            last_failure_at: state.last_failure_at,
            last_resume_at: state.last_resume_at,
        }
    }
}
