//! Command API: named commands from named sources, gated by the
//! control-mode policy

mod params;
mod policy;
mod router;
mod types;
mod voice;

pub use params::{validate, ParamError, ParamKind, ParamSpec};
pub use policy::{ControlMode, ControlPolicy};
pub use router::{CommandRouter, HISTORY_LIMIT};
pub use types::{
    Command, CommandOutcome, CommandResult, CommandSource, ErrorCode, HistoryEntry,
};
