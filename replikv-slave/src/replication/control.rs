//! Operator controls for the replication link
//!
//! Controls arrive as a name plus a textual argument list and always produce
//! a textual answer. Parsing turns them into a closed set of [`AdminCommand`]s
//! before anything touches the failover state.

use super::failover::FailoverController;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

pub const FAILOVER_RESET: &str = "failover_reset";
pub const NEW_MASTER: &str = "new_master";

/// Parsed administrative command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Forget reconnect history and reconnect to the master
    FailoverReset,
    /// Drop the current master and follow a new one
    NewMaster { host: String, port: u16 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Unknown control '{name}' (available: {available})")]
    UnknownCommand { name: String, available: String },

    #[error("'{command}' takes {expected} argument(s), got {got}. Syntax: {syntax}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
        syntax: &'static str,
    },

    #[error("Invalid port '{0}': expected an integer between 1 and 65535")]
    InvalidPort(String),

    #[error("Invalid host: must not be empty")]
    InvalidHost,
}

impl AdminCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::FailoverReset => FAILOVER_RESET,
            AdminCommand::NewMaster { .. } => NEW_MASTER,
        }
    }

    /// Validate a control invocation
    pub fn parse<S: AsRef<str>>(name: &str, args: &[S]) -> Result<Self, ControlError> {
        match name {
            FAILOVER_RESET => {
                if !args.is_empty() {
                    return Err(ControlError::WrongArity {
                        command: FAILOVER_RESET,
                        expected: 0,
                        got: args.len(),
                        syntax: "failover_reset",
                    });
                }
                Ok(AdminCommand::FailoverReset)
            }
            NEW_MASTER => Self::parse_new_master(args),
            other => Err(ControlError::UnknownCommand {
                name: other.to_string(),
                available: ControlRegistry::default().names().join(", "),
            }),
        }
    }

    pub fn parse_new_master<S: AsRef<str>>(args: &[S]) -> Result<Self, ControlError> {
        if args.len() != 2 {
            return Err(ControlError::WrongArity {
                command: NEW_MASTER,
                expected: 2,
                got: args.len(),
                syntax: "new_master host port",
            });
        }

        let host = args[0].as_ref().trim();
        if host.is_empty() {
            return Err(ControlError::InvalidHost);
        }

        let raw_port = args[1].as_ref().trim();
        let port = match raw_port.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => return Err(ControlError::InvalidPort(raw_port.to_string())),
        };

        Ok(AdminCommand::NewMaster {
            host: host.to_string(),
            port,
        })
    }
}

/// Registered control, as listed to operators
#[derive(Debug, Clone, Serialize)]
pub struct ControlInfo {
    pub name: &'static str,
    pub help: &'static str,
}

/// Named controls exposed to the command dispatcher
#[derive(Debug, Clone)]
pub struct ControlRegistry {
    controls: Vec<ControlInfo>,
}

impl Default for ControlRegistry {
    fn default() -> Self {
        Self {
            controls: vec![
                ControlInfo {
                    name: FAILOVER_RESET,
                    help: "Reset the failover module to the state at startup (will force a reconnection to the master).",
                },
                ControlInfo {
                    name: NEW_MASTER,
                    help: "Set a new master for replication (the slave will disconnect and immediately reconnect to the new server). Syntax: \"new_master host port\"",
                },
            ],
        }
    }
}

impl ControlRegistry {
    pub fn controls(&self) -> &[ControlInfo] {
        &self.controls
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.controls.iter().map(|c| c.name).collect()
    }

    /// Run a control by name and render its outcome as text
    pub fn dispatch<S: AsRef<str>>(
        &self,
        controller: &FailoverController,
        name: &str,
        args: &[S],
    ) -> Result<String, ControlError> {
        match AdminCommand::parse(name, args) {
            Ok(command) => {
                info!("Executing control '{}'", command.name());
                Ok(controller.execute(command))
            }
            Err(e) => {
                warn!("Rejected control '{}': {}", name, e);
                Err(e)
            }
        }
    }
}
