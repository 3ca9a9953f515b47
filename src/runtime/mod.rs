//! Runtime: the coordinator task and the command catalog it serves

mod builtin;
mod control;
mod coordinator;
mod daemon;

pub use builtin::register_builtin;
pub use control::{load_control_mode, watch_control_mode};
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use daemon::Core;

#[cfg(test)]
pub(crate) use coordinator::tests::spawn_coordinator;
