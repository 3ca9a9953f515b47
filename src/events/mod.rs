//! Events module: the message bus and the event shapes that flow over it
//!
//! Every asynchronous input (worker adapters, state machine announcements,
//! policy changes) is an [`Event`] published on the [`MessageBus`]. Topics
//! follow the `<domain>:<kind>` convention.

mod bus;
mod pattern;

pub use bus::{MessageBus, SubscriptionId};
pub use pattern::TopicPattern;

pub(crate) use bus::panic_message;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known topics published by the core and the worker adapters
pub mod topics {
    /// Mode transition completed: `{from, to, generation}`
    pub const MODE_CHANGED: &str = "mode:changed";
    /// Control-mode policy changed: `{mode, previous}`
    pub const CONTROL_CHANGED: &str = "control:changed";
    /// Command dispatched, accepted or not: `{name, source, success, error?}`
    pub const COMMAND_EXECUTED: &str = "command:executed";

    /// Gesture recognized: `{name}`
    pub const VISION_GESTURE: &str = "vision:gesture";
    /// Hand position in normalized frame coordinates: `{x, y}`
    pub const VISION_HAND: &str = "vision:hand";
    /// Face observation: `{present, ...}`
    pub const VISION_FACE: &str = "vision:face";
    /// Camera or detector failure: `{reason}`
    pub const VISION_ERROR: &str = "vision:error";

    /// Line received from the serial link: `{bytes, text}`
    pub const SERIAL_RECEIVED: &str = "serial:received";
    /// Serial port failure: `{reason}`
    pub const SERIAL_ERROR: &str = "serial:error";

    /// Utterance finished playing: `{text}`
    pub const SPEAKER_FINISHED: &str = "speaker:finished";
    /// Speech engine failure: `{reason}`
    pub const SPEAKER_ERROR: &str = "speaker:error";

    /// Reminder reached its trigger time:
    /// `{id, content, trigger_count, command?, args?, source?}`
    pub const REMINDER_DUE: &str = "schedule:reminder_due";

    /// Desired light state changed: `{on, brightness}`
    pub const LIGHT_CHANGED: &str = "light:changed";

    /// User setting changed: `{key, old, new}`
    pub const SETTINGS_CHANGED: &str = "settings:changed";

    /// Pet mode started an action: `{action}`
    pub const PET_ACTION: &str = "pet:action";
    /// Pomodoro work block finished: `{minutes}`
    pub const STUDY_FINISHED: &str = "study:finished";
}

/// A single fire-and-forget message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// `<domain>:<kind>` topic
    pub topic: String,
    /// Topic-specific payload
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Event {
    /// Build an event; non-object payloads are wrapped as `{"value": ...}`
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.topic, Value::Object(self.payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wraps_scalar_payload() {
        let event = Event::new("vision:gesture", json!("wave"));
        assert_eq!(event.get_str("value"), Some("wave"));
        assert_eq!(event.topic, "vision:gesture");
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(topics::VISION_HAND, json!({"x": 0.25, "y": 0.75}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("vision:hand"));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_f64("x"), Some(0.25));
    }

    #[test]
    fn test_event_deserialization_without_payload() {
        let event: Event = serde_json::from_str(r#"{"topic":"serial:error"}"#).unwrap();
        assert!(event.payload.is_empty());
    }
}
