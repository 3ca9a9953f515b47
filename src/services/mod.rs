//! Data collaborators behind the command handlers
//!
//! Each service owns one persisted record in the [`JsonStore`]. They are
//! plain structs mutated by the coordinator; the reminder book is shared
//! with the scheduler thread and the settings with the mode factories.

mod lighting;
mod pet;
mod reminders;
mod settings;
mod store;
mod study;

pub use lighting::{LightState, Lighting, DEFAULT_STEP};
pub use pet::{Interaction, Pet, INTERACTIONS};
pub use reminders::{parse_time, NewReminder, Reminder, ReminderBook, Repeat, REPEATS};
pub use settings::{SettingChange, Settings, SettingsBook, SETTING_KEYS, SETTING_PARAMS};
pub use store::JsonStore;
pub use study::{Study, StudySession};

/// Every data service, built once in `main`
pub struct Services {
    pub lighting: Lighting,
    pub pet: Pet,
    pub study: Study,
    pub reminders: ReminderBook,
    pub settings: SettingsBook,
}

impl Services {
    /// Load every record; settings never saved take `defaults`
    pub fn load(store: &JsonStore, defaults: Settings) -> Self {
        let settings = SettingsBook::load(store.clone(), defaults);
        let mut pet = Pet::load(store.clone());
        pet.rename(&settings.get().pet_name);

        Self {
            lighting: Lighting::load(store.clone()),
            pet,
            study: Study::load(store.clone()),
            reminders: ReminderBook::load(store.clone()),
            settings,
        }
    }

    /// Services backed by an in-memory store
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::load(&JsonStore::in_memory(), Settings::default())
    }
}
