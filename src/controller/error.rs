//! Errors raised by mode instances and the mode controller

use crate::adapters::Capability;
use crate::state::ModeId;

/// A mode failed to construct, enter or exit
#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("could not construct {mode}: {reason}")]
    Construct { mode: ModeId, reason: String },

    #[error("could not enter {mode}: {reason}")]
    Enter { mode: ModeId, reason: String },

    #[error("error while exiting {mode}: {reason}")]
    Exit { mode: ModeId, reason: String },

    #[error("no {0} mode is registered")]
    NotRegistered(ModeId),
}

/// The controller could not be assembled
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("{mode} requires the {capability} capability, which was not provided")]
    MissingCapability { mode: ModeId, capability: Capability },

    #[error("the standby mode must be registered")]
    MissingStandby,

    #[error("initial mode failed: {0}")]
    Initial(#[from] ModeError),
}
