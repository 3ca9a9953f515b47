//! Lamp light state
//!
//! Only the desired state lives here; driving the LED is up to whatever
//! listens for `light:changed`.

use serde::{Deserialize, Serialize};

use super::JsonStore;

const RECORD: &str = "lighting";

/// Lowest brightness reachable by stepping down
pub const MIN_STEP_BRIGHTNESS: f64 = 0.1;
pub const DEFAULT_STEP: f64 = 0.1;
pub const DEFAULT_BRIGHTNESS: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    /// 0.0 ..= 1.0
    pub brightness: f64,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            on: false,
            brightness: DEFAULT_BRIGHTNESS,
        }
    }
}

impl LightState {
    pub fn percent(&self) -> u32 {
        (self.brightness * 100.0).round() as u32
    }
}

pub struct Lighting {
    state: LightState,
    store: JsonStore,
}

impl Lighting {
    pub fn load(store: JsonStore) -> Self {
        let state = store.load(RECORD).unwrap_or_default();
        Self { state, store }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    /// Set brightness, clamped to `[0, 1]`; zero switches the light off
    pub fn set_brightness(&mut self, value: f64) -> LightState {
        let value = value.clamp(0.0, 1.0);
        self.state.brightness = value;
        self.state.on = value > 0.0;
        self.persist()
    }

    /// Switch on; a light left at zero comes back at `default_brightness`
    pub fn turn_on(&mut self, default_brightness: f64) -> LightState {
        self.state.on = true;
        if self.state.brightness <= 0.0 {
            self.state.brightness = default_brightness.clamp(MIN_STEP_BRIGHTNESS, 1.0);
        }
        self.persist()
    }

    pub fn turn_off(&mut self) -> LightState {
        self.state.on = false;
        self.persist()
    }

    /// Step brightness by `delta`; stepping never goes below
    /// [`MIN_STEP_BRIGHTNESS`] and always leaves the light on
    pub fn adjust(&mut self, delta: f64) -> LightState {
        let value = (self.state.brightness + delta).clamp(MIN_STEP_BRIGHTNESS, 1.0);
        self.state.brightness = (value * 1000.0).round() / 1000.0;
        self.state.on = true;
        self.persist()
    }

    fn persist(&self) -> LightState {
        self.store.save(RECORD, &self.state);
        self.state
    }
}
