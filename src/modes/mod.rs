//! The lamp's modes and the default registry

mod hand_follow;
mod pet;
mod standby;
mod study;

#[cfg(test)]
pub(crate) mod testing;

pub use hand_follow::HandFollowMode;
pub use pet::PetMode;
pub use standby::StandbyMode;
pub use study::StudyMode;

use tracing::warn;

use crate::adapters::{Capabilities, Capability};
use crate::config::ModesConfig;
use crate::controller::{Mode, ModeRegistry};
use crate::services::SettingsBook;
use crate::state::ModeId;

const HAND_FOLLOW_REQUIRES: &[Capability] = &[Capability::Vision, Capability::Serial];
const PET_REQUIRES: &[Capability] = &[Capability::Speaker];

/// Register every mode whose capabilities are present
///
/// Modes missing a capability are left out with a warning, so requesting
/// them later is rejected as an unknown mode. Values the user can tune
/// are read from `settings` each time a mode is built.
pub fn default_registry(
    config: &ModesConfig,
    caps: &Capabilities,
    settings: &SettingsBook,
) -> ModeRegistry {
    let mut registry = ModeRegistry::new();
    registry.register(ModeId::Standby, &[], || Ok(Box::new(StandbyMode) as Box<dyn Mode>));

    let follow_interval = config.follow_send_interval();
    register_if_capable(&mut registry, caps, ModeId::HandFollow, HAND_FOLLOW_REQUIRES, move || {
        Box::new(HandFollowMode::new(follow_interval))
    });

    let idle = config.pet_idle();
    let pet_settings = settings.clone();
    register_if_capable(&mut registry, caps, ModeId::Pet, PET_REQUIRES, move || {
        Box::new(PetMode::new(idle, &pet_settings.get().pet_name))
    });

    let study_settings = settings.clone();
    registry.register(ModeId::Study, &[], move || {
        Ok(Box::new(StudyMode::new(study_settings.get().pomodoro_work())) as Box<dyn Mode>)
    });

    registry
}

fn register_if_capable<F>(
    registry: &mut ModeRegistry,
    caps: &Capabilities,
    id: ModeId,
    requires: &'static [Capability],
    build: F,
) where
    F: Fn() -> Box<dyn Mode> + Send + Sync + 'static,
{
    match caps.missing(requires) {
        None => registry.register(id, requires, move || Ok(build())),
        Some(capability) => warn!(mode = %id, %capability, "mode disabled, capability unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::testing::Fakes;
    use crate::services::{JsonStore, Settings};
    use serde_json::json;

    fn settings() -> SettingsBook {
        SettingsBook::load(JsonStore::in_memory(), Settings::default())
    }

    #[test]
    fn test_all_modes_with_full_capabilities() {
        let registry = default_registry(&ModesConfig::default(), &Fakes::new().caps(), &settings());
        assert_eq!(registry.ids(), ModeId::ALL.to_vec());
        assert_eq!(registry.build(ModeId::Pet).unwrap().id(), ModeId::Pet);
    }

    #[test]
    fn test_modes_without_capabilities_are_left_out() {
        let registry = default_registry(&ModesConfig::default(), &Capabilities::default(), &settings());
        assert_eq!(registry.ids(), vec![ModeId::Standby, ModeId::Study]);
    }

    #[test]
    fn test_study_mode_uses_current_pomodoro_setting() {
        let fakes = Fakes::new();
        let settings = settings();
        let registry = default_registry(&ModesConfig::default(), &fakes.caps(), &settings);

        let changes = json!({ "pomodoro_work": 40 });
        settings.update(changes.as_object().unwrap()).unwrap();

        let mut study = registry.build(ModeId::Study).unwrap();
        study.on_enter(&fakes.context()).unwrap();
        assert_eq!(
            fakes.speaker.said(),
            vec!["Focus time. I'll remind you in 40 minutes."]
        );
    }
}
