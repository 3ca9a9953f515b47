//! Control-mode permission policy
//!
//! The policy decides which front-end sources may issue commands. It is
//! read on every dispatch and written rarely, so the value itself is an
//! atomic and only writers serialize on a mutex.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::events::panic_message;

use super::CommandSource;

/// Which front-end sources currently have control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    UiOnly,
    VoiceOnly,
    RemoteOnly,
    UiVoice,
    UiRemote,
    All,
}

impl ControlMode {
    pub const ALL: [ControlMode; 6] = [
        ControlMode::UiOnly,
        ControlMode::VoiceOnly,
        ControlMode::RemoteOnly,
        ControlMode::UiVoice,
        ControlMode::UiRemote,
        ControlMode::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::UiOnly => "ui_only",
            ControlMode::VoiceOnly => "voice_only",
            ControlMode::RemoteOnly => "remote_only",
            ControlMode::UiVoice => "ui_voice",
            ControlMode::UiRemote => "ui_remote",
            ControlMode::All => "all",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ControlMode::UiOnly => "touch screen only",
            ControlMode::VoiceOnly => "voice only",
            ControlMode::RemoteOnly => "remote only",
            ControlMode::UiVoice => "touch screen and voice",
            ControlMode::UiRemote => "touch screen and remote",
            ControlMode::All => "all inputs",
        }
    }

    /// Whether `source` may issue commands; internal sources always may
    pub fn allows(self, source: CommandSource) -> bool {
        use CommandSource::*;

        match (self, source) {
            (_, System | Timer) => true,
            (ControlMode::All, _) => true,
            (ControlMode::UiOnly, Ui) => true,
            (ControlMode::VoiceOnly, Voice) => true,
            (ControlMode::RemoteOnly, Remote) => true,
            (ControlMode::UiVoice, Ui | Voice) => true,
            (ControlMode::UiRemote, Ui | Remote) => true,
            _ => false,
        }
    }

    fn index(self) -> u8 {
        match self {
            ControlMode::UiOnly => 0,
            ControlMode::VoiceOnly => 1,
            ControlMode::RemoteOnly => 2,
            ControlMode::UiVoice => 3,
            ControlMode::UiRemote => 4,
            ControlMode::All => 5,
        }
    }

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .unwrap_or(ControlMode::All)
    }
}

impl Default for ControlMode {
    fn default() -> Self {
        Self::All
    }
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown control mode '{0}'")]
pub struct UnknownControlMode(pub String);

impl FromStr for ControlMode {
    type Err = UnknownControlMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownControlMode(s.to_string()))
    }
}

/// Called with `(new, previous)` after the policy changed
pub type PolicyListener = Arc<dyn Fn(ControlMode, ControlMode) + Send + Sync>;

/// Process-wide control-mode policy
pub struct ControlPolicy {
    current: AtomicU8,
    listeners: RwLock<Vec<PolicyListener>>,
    writer: Mutex<()>,
}

impl ControlPolicy {
    pub fn new(mode: ControlMode) -> Self {
        Self {
            current: AtomicU8::new(mode.index()),
            listeners: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn get(&self) -> ControlMode {
        ControlMode::from_index(self.current.load(Ordering::SeqCst))
    }

    pub fn allows(&self, source: CommandSource) -> bool {
        self.get().allows(source)
    }

    /// Swap in `mode` and return the previous one
    ///
    /// Listeners run after the new value is visible, in registration order,
    /// and only when the value actually changed. They must not call `set`.
    pub fn set(&self, mode: ControlMode) -> ControlMode {
        let _writer = self.writer.lock();
        let previous = ControlMode::from_index(self.current.swap(mode.index(), Ordering::SeqCst));
        if previous == mode {
            return previous;
        }

        info!(from = %previous, to = %mode, "control mode changed");

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(mode, previous))) {
                error!(reason = %panic_message(panic.as_ref()), "control-mode listener panicked");
            }
        }
        previous
    }

    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(ControlMode, ControlMode) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }
}

impl Default for ControlPolicy {
    fn default() -> Self {
        Self::new(ControlMode::default())
    }
}
