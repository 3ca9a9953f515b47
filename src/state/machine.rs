//! Core state machine implementation
//!
//! Tracks the active [`ModeId`] and the mode generation. A transition is
//! accepted unless the target is unknown; the executor swaps instances, and
//! only after it succeeds does the identity change and `mode:changed` go out
//! on the bus.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::controller::ModeError;
use crate::events::{topics, MessageBus};

use super::ModeId;

/// Performs the instance-level side of a transition
pub trait TransitionExecutor {
    /// Whether an instance of `mode` can be constructed at all
    fn supports(&self, mode: ModeId) -> bool;

    /// Replace the active `from` instance with a fresh `to` instance
    ///
    /// On error the failure names what is active afterwards. A fallback
    /// instance is entered at `generation + 1`.
    fn replace_mode(&mut self, from: ModeId, to: ModeId, generation: u64)
        -> Result<(), ReplaceFailure>;

    /// Exit the active instance for good
    fn shutdown(&mut self);
}

/// What is active after a failed `replace_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// `from` was never exited
    Untouched,
    /// A fresh instance of this mode was entered at `generation + 1`
    Entered(ModeId),
    /// Nothing could be entered, not even standby
    Nothing,
}

#[derive(Debug)]
pub struct ReplaceFailure {
    pub error: ModeError,
    pub fallback: Fallback,
}

impl ReplaceFailure {
    pub fn untouched(error: ModeError) -> Self {
        Self {
            error,
            fallback: Fallback::Untouched,
        }
    }
}

/// Outcome of an accepted transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Mode changed and `mode:changed` was published
    Changed {
        from: ModeId,
        to: ModeId,
        generation: u64,
    },
    /// Target was already active; nothing happened
    Unchanged(ModeId),
}

/// Reasons a transition request fails
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    #[error("failed to enter {target}: {source}")]
    EnterFailed {
        target: ModeId,
        #[source]
        source: ModeError,
    },

    #[error("state machine has shut down")]
    ShutDown,
}

/// The state machine that owns mode identity
pub struct StateMachine {
    /// Current mode
    current: ModeId,
    /// Bumped on every completed transition
    generation: u64,
    /// Time when the current mode was entered
    entered_at: Instant,
    /// Terminal pseudo-state
    shut_down: bool,
    bus: MessageBus,
}

impl StateMachine {
    /// Create a machine in `standby`, generation 0
    pub fn new(bus: MessageBus) -> Self {
        Self {
            current: ModeId::Standby,
            generation: 0,
            entered_at: Instant::now(),
            shut_down: false,
            bus,
        }
    }

    pub fn current(&self) -> ModeId {
        self.current
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Milliseconds spent in the current mode
    pub fn time_in_mode_ms(&self) -> u64 {
        self.entered_at.elapsed().as_millis() as u64
    }

    /// Resolve a mode name, then request the transition
    pub fn request_transition_named<E>(
        &mut self,
        name: &str,
        executor: &mut E,
    ) -> Result<Transition, TransitionError>
    where
        E: TransitionExecutor + ?Sized,
    {
        let target: ModeId = name.parse()?;
        self.request_transition(target, executor)
    }

    /// Move to `target`, delegating instance work to `executor`
    pub fn request_transition<E>(
        &mut self,
        target: ModeId,
        executor: &mut E,
    ) -> Result<Transition, TransitionError>
    where
        E: TransitionExecutor + ?Sized,
    {
        if self.shut_down {
            return Err(TransitionError::ShutDown);
        }

        if !executor.supports(target) {
            return Err(TransitionError::UnknownMode(target.to_string()));
        }

        if target == self.current {
            debug!(mode = %target, "already in requested mode");
            return Ok(Transition::Unchanged(target));
        }

        let from = self.current;
        let generation = self.generation + 1;
        let duration_ms = self.time_in_mode_ms();

        if let Err(failure) = executor.replace_mode(from, target, generation) {
            warn!(from = %from, to = %target, error = %failure.error, "transition aborted");
            self.fall_back(from, failure.fallback, generation + 1, duration_ms);
            return Err(TransitionError::EnterFailed {
                target,
                source: failure.error,
            });
        }

        self.complete(from, target, generation, duration_ms);
        Ok(Transition::Changed {
            from,
            to: target,
            generation,
        })
    }

    /// Record what the executor left active after a failed entry
    fn fall_back(&mut self, from: ModeId, fallback: Fallback, generation: u64, duration_ms: u64) {
        match fallback {
            Fallback::Untouched => {}
            Fallback::Entered(mode) if mode == from => {
                // Same mode, fresh instance
                self.generation = generation;
                self.entered_at = Instant::now();
            }
            Fallback::Entered(mode) => self.complete(from, mode, generation, duration_ms),
            Fallback::Nothing => {
                error!(mode = %from, "no mode instance is active");
                self.complete(from, ModeId::Standby, generation, duration_ms);
            }
        }
    }

    fn complete(&mut self, from: ModeId, to: ModeId, generation: u64, duration_ms: u64) {
        self.current = to;
        self.generation = generation;
        self.entered_at = Instant::now();

        info!(
            from = %from,
            to = %to,
            generation,
            duration_ms,
            "mode transition"
        );

        self.bus.publish(
            topics::MODE_CHANGED,
            json!({
                "from": from.as_str(),
                "to": to.as_str(),
                "generation": generation,
                "duration_ms": duration_ms,
            }),
        );
    }

    /// Enter the terminal pseudo-state; later requests are refused
    pub fn shutdown<E>(&mut self, executor: &mut E)
    where
        E: TransitionExecutor + ?Sized,
    {
        if self.shut_down {
            return;
        }
        info!(mode = %self.current, "state machine shutting down");
        executor.shutdown();
        self.shut_down = true;
    }
}
