//! User settings
//!
//! One flat record of user-tunable values. Updates are validated against
//! the same parameter contracts the command router uses, applied as a
//! whole and reported back as a list of changed keys.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::command::{validate, ParamError, ParamKind, ParamSpec};
use crate::config::ModesConfig;

use super::JsonStore;

const RECORD: &str = "settings";

/// Contract for `update_settings`; every key is optional
pub const SETTING_PARAMS: &[ParamSpec] = &[
    ParamSpec::optional("volume", ParamKind::Integer { min: 0, max: 100 }),
    ParamSpec::optional("speech_rate", ParamKind::Number { min: 0.5, max: 2.0 }),
    ParamSpec::optional("default_brightness", ParamKind::Number { min: 0.0, max: 1.0 }),
    ParamSpec::optional("eye_care_enabled", ParamKind::Bool),
    ParamSpec::optional("eye_care_interval", ParamKind::Integer { min: 1, max: 240 }),
    ParamSpec::optional("pomodoro_work", ParamKind::Integer { min: 1, max: 120 }),
    ParamSpec::optional("pomodoro_short_break", ParamKind::Integer { min: 1, max: 60 }),
    ParamSpec::optional("pet_name", ParamKind::Text { max_len: 32 }),
];

/// Names of every setting
pub const SETTING_KEYS: &[&str] = &[
    "volume",
    "speech_rate",
    "default_brightness",
    "eye_care_enabled",
    "eye_care_interval",
    "pomodoro_work",
    "pomodoro_short_break",
    "pet_name",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Speaker volume, 0 to 100
    pub volume: u32,
    pub speech_rate: f64,
    /// Brightness used when the light is switched on from dark
    pub default_brightness: f64,
    pub eye_care_enabled: bool,
    /// Minutes between eye-care reminders
    pub eye_care_interval: u64,
    /// Pomodoro work block in minutes
    pub pomodoro_work: u64,
    pub pomodoro_short_break: u64,
    pub pet_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: 70,
            speech_rate: 1.0,
            default_brightness: 0.8,
            eye_care_enabled: true,
            eye_care_interval: 30,
            pomodoro_work: 25,
            pomodoro_short_break: 5,
            pet_name: "Lumi".to_string(),
        }
    }
}

impl Settings {
    /// Defaults with the values the configuration file provides
    pub fn seeded(modes: &ModesConfig) -> Self {
        Self {
            pomodoro_work: modes.pomodoro_work_minutes,
            ..Self::default()
        }
    }

    pub fn pomodoro_work(&self) -> Duration {
        Duration::from_secs(self.pomodoro_work * 60)
    }
}

/// One changed setting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingChange {
    pub key: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] ParamError),

    #[error("unknown setting '{0}'")]
    UnknownKey(String),

    #[error("settings could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cloneable handle onto the settings record
#[derive(Clone)]
pub struct SettingsBook {
    current: Arc<RwLock<Settings>>,
    defaults: Arc<Settings>,
    store: JsonStore,
}

impl SettingsBook {
    /// Load the saved settings; keys never saved take `defaults`
    pub fn load(store: JsonStore, defaults: Settings) -> Self {
        let current = match store.load::<Map<String, Value>>(RECORD) {
            Some(saved) => merge(&defaults, &saved).unwrap_or_else(|_| defaults.clone()),
            None => defaults.clone(),
        };
        Self {
            current: Arc::new(RwLock::new(current)),
            defaults: Arc::new(defaults),
            store,
        }
    }

    pub fn get(&self) -> Settings {
        self.current.read().clone()
    }

    /// Validate and apply `changes` as a whole
    pub fn update(&self, changes: &Map<String, Value>) -> Result<Vec<SettingChange>, SettingsError> {
        validate(SETTING_PARAMS, changes)?;

        let mut current = self.current.write();
        let next = merge(&current, changes)?;
        let diff = diff(&current, &next)?;
        if !diff.is_empty() {
            *current = next;
            self.store.save(RECORD, &*current);
            info!(keys = ?diff.iter().map(|c| c.key.as_str()).collect::<Vec<_>>(), "settings updated");
        }
        Ok(diff)
    }

    /// Restore one setting, or all of them, to the defaults
    pub fn reset(&self, key: Option<&str>) -> Result<Vec<SettingChange>, SettingsError> {
        let defaults = to_map(&self.defaults)?;
        let changes = match key {
            Some(key) => {
                let value = defaults
                    .get(key)
                    .cloned()
                    .ok_or_else(|| SettingsError::UnknownKey(key.to_string()))?;
                let mut changes = Map::new();
                changes.insert(key.to_string(), value);
                changes
            }
            None => defaults,
        };

        let mut current = self.current.write();
        let next = merge(&current, &changes)?;
        let diff = diff(&current, &next)?;
        if !diff.is_empty() {
            *current = next;
            self.store.save(RECORD, &*current);
            info!(key = key.unwrap_or("all"), "settings reset");
        }
        Ok(diff)
    }
}

fn to_map(settings: &Settings) -> Result<Map<String, Value>, serde_json::Error> {
    match serde_json::to_value(settings)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn merge(base: &Settings, changes: &Map<String, Value>) -> Result<Settings, serde_json::Error> {
    let mut map = to_map(base)?;
    for (key, value) in changes {
        if map.contains_key(key) {
            map.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(Value::Object(map))
}

fn diff(old: &Settings, new: &Settings) -> Result<Vec<SettingChange>, serde_json::Error> {
    let old = to_map(old)?;
    let new = to_map(new)?;
    Ok(SETTING_KEYS
        .iter()
        .filter_map(|key| {
            let (before, after) = (old.get(*key)?, new.get(*key)?);
            (before != after).then(|| SettingChange {
                key: key.to_string(),
                old: before.clone(),
                new: after.clone(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn changes(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_update_reports_changed_keys() {
        let store = JsonStore::in_memory();
        let settings = SettingsBook::load(store.clone(), Settings::default());

        let diff = settings
            .update(&changes(json!({ "volume": 40, "pet_name": "Lumi", "pomodoro_work": 50 })))
            .unwrap();
        let keys: Vec<_> = diff.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["volume", "pomodoro_work"]);
        assert_eq!(diff[0].old, json!(70));
        assert_eq!(settings.get().pomodoro_work(), Duration::from_secs(50 * 60));

        let reloaded = SettingsBook::load(store, Settings::default());
        assert_eq!(reloaded.get().volume, 40);
    }

    #[test]
    fn test_invalid_update_changes_nothing() {
        let settings = SettingsBook::load(JsonStore::in_memory(), Settings::default());

        let err = settings
            .update(&changes(json!({ "volume": 30, "speech_rate": 9.0 })))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(ParamError::OutOfRange { name: "speech_rate", .. })));
        assert!(settings.update(&changes(json!({ "theme": "dark" }))).is_err());
        assert_eq!(settings.get(), Settings::default());
    }

    #[test]
    fn test_reset_one_and_all() {
        let settings = SettingsBook::load(JsonStore::in_memory(), Settings::default());
        settings
            .update(&changes(json!({ "volume": 10, "eye_care_enabled": false })))
            .unwrap();

        let one = settings.reset(Some("volume")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(settings.get().volume, 70);
        assert!(!settings.get().eye_care_enabled);

        assert_eq!(settings.reset(None).unwrap().len(), 1);
        assert_eq!(settings.get(), Settings::default());
        assert!(matches!(settings.reset(Some("theme")), Err(SettingsError::UnknownKey(_))));
    }

    #[test]
    fn test_seeded_defaults_fill_missing_keys() {
        let store = JsonStore::in_memory();
        store.save(RECORD, &json!({ "volume": 55 }));

        let modes = ModesConfig {
            pomodoro_work_minutes: 45,
            ..Default::default()
        };
        let settings = SettingsBook::load(store, Settings::seeded(&modes));
        assert_eq!(settings.get().volume, 55);
        assert_eq!(settings.get().pomodoro_work, 45);
    }
}
