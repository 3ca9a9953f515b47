//! Mode identities

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::TransitionError;

/// The behaviors the lamp can be in; exactly one is active at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeId {
    /// Idle, lamp waits for a command
    Standby,
    /// Lamp head tracks the user's hand
    HandFollow,
    /// Desk pet reacting to gestures and faces
    Pet,
    /// Pomodoro study timer
    Study,
}

impl ModeId {
    pub const ALL: [ModeId; 4] = [
        ModeId::Standby,
        ModeId::HandFollow,
        ModeId::Pet,
        ModeId::Study,
    ];

    /// Wire names, in the same order as [`ModeId::ALL`]
    pub const NAMES: [&'static str; 4] = ["standby", "hand_follow", "pet", "study"];

    pub fn as_str(self) -> &'static str {
        match self {
            ModeId::Standby => "standby",
            ModeId::HandFollow => "hand_follow",
            ModeId::Pet => "pet",
            ModeId::Study => "study",
        }
    }
}

impl Default for ModeId {
    fn default() -> Self {
        Self::Standby
    }
}

impl std::fmt::Display for ModeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeId {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModeId::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| TransitionError::UnknownMode(s.to_string()))
    }
}
