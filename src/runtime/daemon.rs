//! Everything the coordinator mutates, in one place
//!
//! [`Core`] is the context the command handlers run against. It is owned by
//! the coordinator task, so every transition and command is serialized
//! without further locking.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{error, info};

use crate::command::ControlPolicy;
use crate::controller::{Delivery, ModeController};
use crate::events::{topics, MessageBus};
use crate::lifecycle::ShutdownSignal;
use crate::services::{LightState, SettingChange, Services};
use crate::state::{ModeId, StateMachine, Transition, TransitionError};

pub struct Core {
    pub machine: StateMachine,
    pub modes: ModeController,
    pub services: Services,
    pub policy: Arc<ControlPolicy>,
    pub shutdown: ShutdownSignal,
    bus: MessageBus,
    started: Instant,
}

impl Core {
    pub fn new(
        modes: ModeController,
        services: Services,
        policy: Arc<ControlPolicy>,
        bus: MessageBus,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            machine: StateMachine::new(bus.clone()),
            modes,
            services,
            policy,
            shutdown,
            bus,
            started: Instant::now(),
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn current_mode(&self) -> ModeId {
        self.machine.current()
    }

    pub fn pomodoro_minutes(&self) -> u64 {
        self.services.settings.get().pomodoro_work
    }

    pub fn switch_mode(&mut self, target: ModeId) -> Result<Transition, TransitionError> {
        self.machine.request_transition(target, &mut self.modes)
    }

    pub fn switch_mode_named(&mut self, name: &str) -> Result<Transition, TransitionError> {
        self.machine.request_transition_named(name, &mut self.modes)
    }

    pub fn deliver(&mut self, delivery: Delivery) {
        self.modes.deliver(delivery);
    }

    /// Drive the active mode once; a finished mode falls back to standby
    pub fn tick(&mut self) {
        if self.machine.is_shut_down() || self.modes.tick() {
            return;
        }

        let finished = self.machine.current();
        if finished == ModeId::Standby {
            return;
        }

        info!(mode = %finished, "mode finished, returning to standby");
        if let Err(e) = self.switch_mode(ModeId::Standby) {
            error!(mode = %finished, error = %e, "could not return to standby");
        }
    }

    /// Queue speech on the speaker, if there is one
    pub fn say(&self, text: &str) {
        self.modes.context().say(text);
    }

    pub fn has_speaker(&self) -> bool {
        self.modes.context().speaker().is_some()
    }

    /// Announce a new light state to whoever drives the LED
    pub fn light_changed(&self, state: LightState) -> LightState {
        self.bus.publish(
            topics::LIGHT_CHANGED,
            json!({ "on": state.on, "brightness": state.brightness }),
        );
        state
    }

    /// Publish each change and apply the ones other services mirror
    pub fn settings_changed(&mut self, changes: &[SettingChange]) {
        for change in changes {
            if change.key == "pet_name" {
                if let Some(name) = change.new.as_str() {
                    self.services.pet.rename(name);
                }
            }
            self.bus.publish(
                topics::SETTINGS_CHANGED,
                json!({ "key": change.key, "old": change.old, "new": change.new }),
            );
        }
    }

    /// Exit the active mode and refuse further transitions
    pub fn shutdown(&mut self) {
        self.machine.shutdown(&mut self.modes);
    }

    pub fn status(&self) -> Value {
        let light = self.services.lighting.state();
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": self.started.elapsed().as_secs(),
            "mode": self.machine.current().as_str(),
            "active_instance": self.modes.active_mode().map(ModeId::as_str),
            "generation": self.machine.generation(),
            "time_in_mode_ms": self.machine.time_in_mode_ms(),
            "available_modes": self
                .modes
                .registry()
                .ids()
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>(),
            "control_mode": self.policy.get().as_str(),
            "light": { "on": light.on, "brightness": light.brightness },
            "pet": self.services.pet.status(),
            "study": self.services.study.status(),
            "pending_reminders": self.services.reminders.pending(),
            "subscriptions": self.bus.subscriber_count(),
        })
    }
}
