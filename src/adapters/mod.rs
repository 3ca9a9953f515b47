//! Worker adapters bridging hardware domains to the message bus
//!
//! Each worker runs on its own thread and talks to the core only by
//! publishing events. Modes reach the hardware through the narrow
//! capability traits below, which never block the caller.

mod scheduler;
mod serial;
mod speaker;
mod vision;

pub use scheduler::ReminderScheduler;
pub use serial::{encode_frame, position_frame, SerialSender, SerialWorker};
pub use speaker::{SpeakerHandle, SpeakerWorker};
pub use vision::{VisionHandle, VisionWorker};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Hardware capability a mode may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Vision,
    Serial,
    Speaker,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Vision => write!(f, "vision"),
            Capability::Serial => write!(f, "serial"),
            Capability::Speaker => write!(f, "speaker"),
        }
    }
}

/// Lifecycle shared by every worker adapter
pub trait WorkerAdapter: Send {
    fn name(&self) -> &'static str;

    /// Spawn the worker thread(s)
    fn start(&mut self) -> Result<(), AdapterError>;

    /// Ask the worker to stop; does not wait for it
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Camera capture sessions
pub trait VisionControl: Send + Sync {
    /// Start forwarding detections; `purpose` is for logging only
    fn begin_session(&self, purpose: &str);

    fn end_session(&self);

    fn is_capturing(&self) -> bool;
}

/// Outbound side of the serial link
pub trait SerialLink: Send + Sync {
    /// Queue bytes for transmission without waiting for the port
    fn send(&self, bytes: &[u8]) -> Result<(), AdapterError>;
}

/// Spoken feedback
pub trait Speaker: Send + Sync {
    /// Queue an utterance
    fn say(&self, text: &str) -> Result<(), AdapterError>;

    /// Drop everything still queued
    fn hush(&self);
}

/// Capabilities injected into the mode controller
#[derive(Clone, Default)]
pub struct Capabilities {
    pub vision: Option<Arc<dyn VisionControl>>,
    pub serial: Option<Arc<dyn SerialLink>>,
    pub speaker: Option<Arc<dyn Speaker>>,
}

impl Capabilities {
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Vision => self.vision.is_some(),
            Capability::Serial => self.serial.is_some(),
            Capability::Speaker => self.speaker.is_some(),
        }
    }

    /// First capability in `required` that is absent
    pub fn missing(&self, required: &[Capability]) -> Option<Capability> {
        required.iter().copied().find(|c| !self.has(*c))
    }
}

/// Errors that can occur in worker adapters
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{0} worker is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} worker is not running")]
    NotRunning(&'static str),

    #[error("{adapter} unavailable: {reason}")]
    Unavailable { adapter: &'static str, reason: String },

    #[error("{0} queue is full")]
    QueueFull(&'static str),

    #[error("failed to spawn {adapter} thread: {reason}")]
    ThreadSpawn { adapter: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
