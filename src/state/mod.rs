//! State machine module for mode identity and transitions
//!
//! The machine owns which mode is active and the mode generation counter.
//! Constructing and tearing down mode instances is delegated to a
//! [`TransitionExecutor`], which the mode controller implements.

mod machine;
mod mode_id;

pub use machine::{
    Fallback, ReplaceFailure, StateMachine, Transition, TransitionError, TransitionExecutor,
};
pub use mode_id::ModeId;
