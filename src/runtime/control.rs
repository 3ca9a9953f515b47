//! Persisted control mode and its change announcements

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::command::{ControlMode, ControlPolicy};
use crate::events::{topics, MessageBus};
use crate::services::JsonStore;

const RECORD: &str = "control";

#[derive(Debug, Serialize, Deserialize)]
struct ControlRecord {
    mode: ControlMode,
}

/// Control mode stored by a previous run, or `fallback`
pub fn load_control_mode(store: &JsonStore, fallback: ControlMode) -> ControlMode {
    match store.load::<ControlRecord>(RECORD) {
        Some(record) => {
            debug!(mode = %record.mode, "restored control mode");
            record.mode
        }
        None => fallback,
    }
}

/// Publish `control:changed` on every policy change, and persist the new
/// value when `store` is given
pub fn watch_control_mode(policy: &ControlPolicy, bus: MessageBus, store: Option<JsonStore>) {
    policy.on_change(move |mode, previous| {
        if let Some(store) = &store {
            store.save(RECORD, &ControlRecord { mode });
        }
        bus.publish(
            topics::CONTROL_CHANGED,
            json!({ "mode": mode.as_str(), "previous": previous.as_str() }),
        );
    });
}
