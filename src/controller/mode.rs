//! The mode trait and the context handed to mode instances

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{Capabilities, SerialLink, Speaker, VisionControl};
use crate::events::{Event, MessageBus};
use crate::state::ModeId;

use super::ModeError;

/// One behavior of the lamp
///
/// Instances are created on entry and dropped on exit; state that must
/// outlive a visit belongs in a service. All methods except `id` have
/// no-op defaults.
pub trait Mode: Send {
    fn id(&self) -> ModeId;

    /// Bus topics delivered to [`Mode::handle_event`] while active
    fn topics(&self) -> &'static [&'static str] {
        &[]
    }

    fn on_enter(&mut self, _ctx: &ModeContext) -> Result<(), ModeError> {
        Ok(())
    }

    fn on_exit(&mut self, _ctx: &ModeContext) -> Result<(), ModeError> {
        Ok(())
    }

    /// Periodic tick; `false` means the mode is finished
    fn update(&mut self, _ctx: &ModeContext) -> bool {
        true
    }

    fn handle_event(&mut self, _ctx: &ModeContext, _event: &Event) {}
}

/// What a mode instance may touch
pub struct ModeContext {
    pub caps: Capabilities,
    pub bus: MessageBus,
    /// Generation of the instance currently being driven
    pub generation: u64,
}

impl ModeContext {
    pub fn new(caps: Capabilities, bus: MessageBus) -> Self {
        Self {
            caps,
            bus,
            generation: 0,
        }
    }

    pub fn vision(&self) -> Option<&Arc<dyn VisionControl>> {
        self.caps.vision.as_ref()
    }

    pub fn serial(&self) -> Option<&Arc<dyn SerialLink>> {
        self.caps.serial.as_ref()
    }

    pub fn speaker(&self) -> Option<&Arc<dyn Speaker>> {
        self.caps.speaker.as_ref()
    }

    /// Queue speech; failures are logged and otherwise ignored
    pub fn say(&self, text: &str) {
        match self.speaker() {
            Some(speaker) => {
                if let Err(e) = speaker.say(text) {
                    warn!(error = %e, text, "could not queue speech");
                }
            }
            None => debug!(text, "no speaker, dropping speech"),
        }
    }

    /// Queue a serial frame; returns whether it was accepted
    pub fn send_serial(&self, bytes: &[u8]) -> bool {
        match self.serial() {
            Some(serial) => match serial.send(bytes) {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "serial frame dropped");
                    false
                }
            },
            None => false,
        }
    }

    pub fn publish(&self, topic: &str, payload: Value) {
        self.bus.publish(topic, payload);
    }
}
