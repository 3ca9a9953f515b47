//! The built-in command catalog

use anyhow::{anyhow, bail, Context};
use chrono::{Duration, Local};
use serde_json::{json, Map, Value};

use crate::command::{Command, CommandOutcome, CommandRouter, ParamKind, ParamSpec};
use crate::events::topics;
use crate::services::{
    parse_time, LightState, NewReminder, Repeat, SettingChange, DEFAULT_STEP, INTERACTIONS,
    REPEATS, SETTING_KEYS, SETTING_PARAMS,
};
use crate::state::{ModeId, Transition};

use super::Core;

type Outcome = anyhow::Result<CommandOutcome>;

const SWITCH_MODE: &[ParamSpec] = &[ParamSpec::required("mode", ParamKind::Choice(&ModeId::NAMES))];

const BRIGHTNESS: &[ParamSpec] = &[ParamSpec::required(
    "value",
    ParamKind::Number { min: 0.0, max: 1.0 },
)];

const STEP: &[ParamSpec] = &[ParamSpec::optional(
    "step",
    ParamKind::Number { min: 0.0, max: 1.0 },
)];

const PET_INTERACT: &[ParamSpec] = &[ParamSpec::required("action", ParamKind::Choice(INTERACTIONS))];

const START_STUDY: &[ParamSpec] = &[ParamSpec::optional(
    "mode",
    ParamKind::Choice(&["study", "pomodoro"]),
)];

const ADD_REMINDER: &[ParamSpec] = &[
    ParamSpec::required("content", ParamKind::Text { max_len: 200 }),
    ParamSpec::optional("minutes", ParamKind::Integer { min: 1, max: 1440 }),
    ParamSpec::optional("at", ParamKind::Text { max_len: 32 }),
    ParamSpec::optional("repeat", ParamKind::Choice(REPEATS)),
    ParamSpec::optional("every_minutes", ParamKind::Integer { min: 1, max: 1440 }),
    ParamSpec::optional("command", ParamKind::Text { max_len: 64 }),
    ParamSpec::optional("args", ParamKind::Object),
];

const DELETE_REMINDER: &[ParamSpec] = &[ParamSpec::required("id", ParamKind::Text { max_len: 32 })];

const ENABLE_REMINDER: &[ParamSpec] = &[
    ParamSpec::required("id", ParamKind::Text { max_len: 32 }),
    ParamSpec::required("enabled", ParamKind::Bool),
];

const RESET_SETTINGS: &[ParamSpec] = &[ParamSpec::optional("key", ParamKind::Choice(SETTING_KEYS))];

const SPEAK: &[ParamSpec] = &[ParamSpec::required("text", ParamKind::Text { max_len: 500 })];

/// Shortcut commands that enter one mode
const ENTER_COMMANDS: [(&str, &str, ModeId); 4] = [
    ("enter_standby", "Switch to standby", ModeId::Standby),
    ("enter_hand_follow", "Follow the user's hand", ModeId::HandFollow),
    ("enter_pet_mode", "Act as a desk pet", ModeId::Pet),
    ("enter_study_mode", "Start a focus block", ModeId::Study),
];

/// Register every built-in command on `router`
pub fn register_builtin(router: &mut CommandRouter<Core>) {
    router.register("switch_mode", "Switch to the named mode", SWITCH_MODE, |core, cmd| {
        let name = cmd.arg_str("mode").unwrap_or_default();
        let outcome = core.switch_mode_named(name)?;
        Ok(transition_outcome(core, outcome))
    });
    for (name, description, mode) in ENTER_COMMANDS {
        router.register(name, description, &[], move |core, _| {
            let outcome = core.switch_mode(mode)?;
            Ok(transition_outcome(core, outcome))
        });
    }

    router.register("set_brightness", "Set brightness (0.0 to 1.0)", BRIGHTNESS, |core, cmd| {
        let value = cmd.arg_f64("value").unwrap_or_default();
        let state = core.services.lighting.set_brightness(value);
        Ok(light_outcome(core, state, format!("brightness set to {}%", state.percent())))
    });
    router.register("turn_on", "Turn the light on", &[], |core, _| {
        let brightness = core.services.settings.get().default_brightness;
        let state = core.services.lighting.turn_on(brightness);
        Ok(light_outcome(core, state, "light on".to_string()))
    });
    router.register("turn_off", "Turn the light off", &[], |core, _| {
        let state = core.services.lighting.turn_off();
        Ok(light_outcome(core, state, "light off".to_string()))
    });
    router.register("brightness_up", "Raise brightness by a step", STEP, |core, cmd| {
        let state = core.services.lighting.adjust(step(cmd));
        Ok(light_outcome(core, state, format!("brightness up to {}%", state.percent())))
    });
    router.register("brightness_down", "Lower brightness by a step", STEP, |core, cmd| {
        let state = core.services.lighting.adjust(-step(cmd));
        Ok(light_outcome(core, state, format!("brightness down to {}%", state.percent())))
    });

    router.register("pet_interact", "Interact with the pet", PET_INTERACT, pet_interact);

    router.register("start_study", "Start a study session", START_STUDY, |core, cmd| {
        match cmd.arg_str("mode").unwrap_or("study") {
            "pomodoro" => start_pomodoro(core),
            kind => {
                let session = core.services.study.start(kind)?;
                Ok(CommandOutcome::message("study session started")
                    .with_data(json!({ "session_id": session.id, "kind": session.kind })))
            }
        }
    });
    router.register("start_pomodoro", "Start a pomodoro work block", &[], |core, _| {
        start_pomodoro(core)
    });
    router.register("end_study", "End the running study session", &[], end_study);

    router.register("add_reminder", "Remind at a time or after some minutes", ADD_REMINDER, add_reminder);
    router.register("list_reminders", "List pending reminders", &[], |core, _| {
        let reminders = core.services.reminders.list();
        Ok(CommandOutcome::message(format!("{} reminder(s) pending", core.services.reminders.pending()))
            .with_data(json!({ "reminders": reminders })))
    });
    router.register("enable_reminder", "Enable or pause a reminder", ENABLE_REMINDER, |core, cmd| {
        let id = cmd.arg_str("id").unwrap_or_default();
        let enabled = cmd.args.get("enabled").and_then(Value::as_bool).unwrap_or(true);
        if !core.services.reminders.set_enabled(id, enabled) {
            bail!("no reminder with id '{}'", id);
        }
        let state = if enabled { "enabled" } else { "paused" };
        Ok(CommandOutcome::message(format!("reminder {} {}", id, state)))
    });
    router.register("delete_reminder", "Delete a pending reminder", DELETE_REMINDER, |core, cmd| {
        let id = cmd.arg_str("id").unwrap_or_default();
        if !core.services.reminders.remove(id) {
            bail!("no reminder with id '{}'", id);
        }
        Ok(CommandOutcome::message(format!("reminder {} deleted", id)))
    });

    router.register("speak", "Say something through the speaker", SPEAK, |core, cmd| {
        if !core.has_speaker() {
            bail!("no speaker available");
        }
        let text = cmd.arg_str("text").unwrap_or_default();
        core.say(text);
        Ok(CommandOutcome::message("speaking"))
    });
    router.register("get_settings", "Report the user settings", &[], |core, _| {
        let settings = core.services.settings.get();
        let data = serde_json::to_value(&settings).context("failed to encode settings")?;
        Ok(CommandOutcome::message("ok").with_data(data))
    });
    router.register("update_settings", "Change one or more settings", SETTING_PARAMS, |core, cmd| {
        let changes = core.services.settings.update(&cmd.args)?;
        Ok(settings_outcome(core, changes, "updated"))
    });
    router.register("reset_settings", "Restore default settings", RESET_SETTINGS, |core, cmd| {
        let changes = core.services.settings.reset(cmd.arg_str("key"))?;
        Ok(settings_outcome(core, changes, "reset"))
    });

    router.register("get_status", "Report daemon status", &[], |core, _| {
        Ok(CommandOutcome::message("ok").with_data(core.status()))
    });
    router.register("shutdown", "Stop the daemon", &[], |core, cmd| {
        core.shutdown.trigger(cmd.source.as_str());
        Ok(CommandOutcome::message("shutting down"))
    });
}

fn transition_outcome(core: &Core, outcome: Transition) -> CommandOutcome {
    let message = match outcome {
        Transition::Changed { from, to, .. } => format!("switched from {} to {}", from, to),
        Transition::Unchanged(mode) => format!("already in {}", mode),
    };
    CommandOutcome::message(message).with_data(json!({
        "mode": core.current_mode().as_str(),
        "generation": core.machine.generation(),
    }))
}

fn light_outcome(core: &Core, state: LightState, message: String) -> CommandOutcome {
    core.light_changed(state);
    CommandOutcome::message(message)
        .with_data(json!({ "on": state.on, "brightness": state.brightness }))
}

fn settings_outcome(core: &mut Core, changes: Vec<SettingChange>, verb: &str) -> CommandOutcome {
    core.settings_changed(&changes);
    CommandOutcome::message(format!("{} setting(s) {}", changes.len(), verb))
        .with_data(json!({ "changes": changes, "settings": core.services.settings.get() }))
}

fn step(cmd: &Command) -> f64 {
    cmd.arg_f64("step").unwrap_or(DEFAULT_STEP)
}

fn pet_interact(core: &mut Core, cmd: &Command) -> Outcome {
    let action = cmd.arg_str("action").unwrap_or_default();
    let interaction = core.services.pet.interact(action)?;

    core.say(&interaction.message);
    core.bus().publish(
        topics::PET_ACTION,
        json!({ "action": interaction.action, "trigger": "command" }),
    );

    let data = serde_json::to_value(&interaction).context("failed to encode interaction")?;
    Ok(CommandOutcome::message(interaction.message.clone()).with_data(data))
}

fn start_pomodoro(core: &mut Core) -> Outcome {
    if let Some(active) = core.services.study.active() {
        bail!("a {} session is already running", active.kind);
    }

    let minutes = core.pomodoro_minutes();
    core.switch_mode(ModeId::Study)?;
    let session = core.services.study.start("pomodoro")?;
    Ok(CommandOutcome::message(format!("pomodoro started, break in {} minutes", minutes))
        .with_data(json!({ "session_id": session.id, "minutes": minutes })))
}

fn end_study(core: &mut Core, _cmd: &Command) -> Outcome {
    let (session, minutes) = core.services.study.end()?;
    if core.current_mode() == ModeId::Study {
        core.switch_mode(ModeId::Standby)?;
    }

    Ok(CommandOutcome::message(format!("study session ended after {} minutes", minutes))
        .with_data(json!({
            "session_id": session.id,
            "minutes": minutes,
            "pomodoros": session.pomodoros,
        })))
}

fn add_reminder(core: &mut Core, cmd: &Command) -> Outcome {
    let content = cmd.arg_str("content").unwrap_or_default();
    let new = match (cmd.arg_i64("minutes"), cmd.arg_str("at")) {
        (Some(_), Some(_)) => bail!("give either minutes or at, not both"),
        (Some(minutes), None) => NewReminder::after(content, Duration::minutes(minutes)),
        (None, Some(at)) => {
            let due_at = parse_time(at, Local::now())
                .ok_or_else(|| anyhow!("cannot read '{}' as a time", at))?;
            NewReminder::at(content, due_at)
        }
        (None, None) => bail!("a reminder needs minutes or at"),
    };

    let repeat = cmd.arg_str("repeat").and_then(Repeat::parse).unwrap_or_default();
    let every_minutes = cmd.arg_i64("every_minutes").unwrap_or(0);
    if repeat == Repeat::Custom && every_minutes == 0 {
        bail!("a custom repeat needs every_minutes");
    }
    let mut new = new.repeating(repeat, u32::try_from(every_minutes).unwrap_or(0));

    if let Some(command) = cmd.arg_str("command") {
        let args = cmd
            .args
            .get("args")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        new = new.with_command(command, args, cmd.source);
    }

    let reminder = core.services.reminders.add(new);
    Ok(CommandOutcome::message(format!(
        "I'll remind you at {} to {}",
        reminder.due_at.format("%H:%M"),
        content
    ))
    .with_data(json!({
        "reminder_id": reminder.id,
        "due_at": reminder.due_at,
        "repeat": reminder.repeat,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandResult, CommandSource, ControlMode, ErrorCode};
    use crate::config::ModesConfig;
    use crate::modes::testing::Fakes;
    use crate::runtime::daemon::tests::create_core;
    use std::sync::Arc;

    fn setup(fakes: &Fakes) -> (CommandRouter<Core>, Core) {
        let core = create_core(fakes, &ModesConfig::default());
        let mut router = CommandRouter::new(Arc::clone(&core.policy));
        register_builtin(&mut router);
        (router, core)
    }

    fn run(router: &mut CommandRouter<Core>, core: &mut Core, name: &str, args: Value) -> CommandResult {
        let args = args.as_object().cloned().unwrap_or_default();
        router.dispatch(core, name, args, CommandSource::Ui)
    }

    #[test]
    fn test_switch_mode_command() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let result = run(&mut router, &mut core, "switch_mode", json!({ "mode": "pet" }));
        assert!(result.success, "{}", result.message);
        assert_eq!(core.current_mode(), ModeId::Pet);

        let again = run(&mut router, &mut core, "enter_pet_mode", json!({}));
        assert!(again.success);
        assert_eq!(again.message, "already in pet");

        let bad = run(&mut router, &mut core, "switch_mode", json!({ "mode": "party" }));
        assert_eq!(bad.error, Some(ErrorCode::InvalidArgs));
    }

    #[test]
    fn test_brightness_commands() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let result = run(&mut router, &mut core, "set_brightness", json!({ "value": 0.5 }));
        assert!(result.success);
        assert_eq!(result.message, "brightness set to 50%");

        let up = run(&mut router, &mut core, "brightness_up", json!({ "step": 0.2 }));
        assert_eq!(up.data.unwrap()["brightness"], json!(0.7));

        let too_bright = run(&mut router, &mut core, "set_brightness", json!({ "value": 1.5 }));
        assert_eq!(too_bright.error, Some(ErrorCode::InvalidArgs));
        assert_eq!(core.services.lighting.state().brightness, 0.7);
    }

    #[test]
    fn test_ui_only_denies_voice() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);
        core.policy.set(ControlMode::UiOnly);

        let result = router.dispatch(&mut core, "turn_on", Map::new(), CommandSource::Voice);
        assert_eq!(result.error, Some(ErrorCode::SourceNotAllowed));
        assert!(!core.services.lighting.state().on);
    }

    #[test]
    fn test_pet_interact_speaks_reply() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let result = run(&mut router, &mut core, "pet_interact", json!({ "action": "feed" }));
        assert!(result.success);
        assert_eq!(fakes.speaker.said(), vec![result.message.clone()]);
        assert_eq!(core.services.pet.state().total_interactions, 1);
    }

    #[test]
    fn test_pomodoro_enters_study_mode() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let result = run(&mut router, &mut core, "start_pomodoro", json!({}));
        assert!(result.success, "{}", result.message);
        assert_eq!(core.current_mode(), ModeId::Study);

        let twice = run(&mut router, &mut core, "start_study", json!({ "mode": "pomodoro" }));
        assert_eq!(twice.error, Some(ErrorCode::ExecutionError));

        let ended = run(&mut router, &mut core, "end_study", json!({}));
        assert!(ended.success);
        assert_eq!(core.current_mode(), ModeId::Standby);
    }

    #[test]
    fn test_end_study_without_session() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let result = run(&mut router, &mut core, "end_study", json!({}));
        assert_eq!(result.error, Some(ErrorCode::ExecutionError));
        assert_eq!(result.message, "no study session is running");
    }

    #[test]
    fn test_reminder_commands() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let added = run(
            &mut router,
            &mut core,
            "add_reminder",
            json!({ "content": "stretch", "minutes": 20 }),
        );
        assert!(added.success);
        let id = added.data.unwrap()["reminder_id"].as_str().unwrap().to_string();

        let listed = run(&mut router, &mut core, "list_reminders", json!({}));
        assert_eq!(listed.message, "1 reminder(s) pending");

        let out_of_range = run(
            &mut router,
            &mut core,
            "add_reminder",
            json!({ "content": "later", "minutes": 5000 }),
        );
        assert_eq!(out_of_range.error, Some(ErrorCode::InvalidArgs));

        assert!(run(&mut router, &mut core, "delete_reminder", json!({ "id": id })).success);
        let missing = run(&mut router, &mut core, "delete_reminder", json!({ "id": "r-99" }));
        assert_eq!(missing.error, Some(ErrorCode::ExecutionError));
    }

    #[test]
    fn test_reminder_at_time_with_repeat() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let added = run(
            &mut router,
            &mut core,
            "add_reminder",
            json!({ "content": "water plants", "at": "07:30", "repeat": "daily" }),
        );
        assert!(added.success, "{}", added.message);
        assert_eq!(added.data.unwrap()["repeat"], json!("daily"));
        let reminder = &core.services.reminders.list()[0];
        assert_eq!(reminder.due_at.format("%H:%M").to_string(), "07:30");

        let neither = run(&mut router, &mut core, "add_reminder", json!({ "content": "hm" }));
        assert_eq!(neither.error, Some(ErrorCode::ExecutionError));

        let both = run(
            &mut router,
            &mut core,
            "add_reminder",
            json!({ "content": "hm", "minutes": 5, "at": "07:30" }),
        );
        assert_eq!(both.error, Some(ErrorCode::ExecutionError));

        let garbled = run(&mut router, &mut core, "add_reminder", json!({ "content": "hm", "at": "soonish" }));
        assert_eq!(garbled.error, Some(ErrorCode::ExecutionError));

        let custom = run(
            &mut router,
            &mut core,
            "add_reminder",
            json!({ "content": "blink", "minutes": 5, "repeat": "custom" }),
        );
        assert_eq!(custom.error, Some(ErrorCode::ExecutionError));
        assert_eq!(core.services.reminders.list().len(), 1);
    }

    #[test]
    fn test_enable_reminder_pauses_and_resumes() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let added = run(&mut router, &mut core, "add_reminder", json!({ "content": "stand up", "minutes": 30 }));
        let id = added.data.unwrap()["reminder_id"].as_str().unwrap().to_string();

        let paused = run(&mut router, &mut core, "enable_reminder", json!({ "id": id, "enabled": false }));
        assert!(paused.success);
        assert_eq!(core.services.reminders.pending(), 0);

        let listed = run(&mut router, &mut core, "list_reminders", json!({}));
        assert_eq!(listed.message, "0 reminder(s) pending");

        run(&mut router, &mut core, "enable_reminder", json!({ "id": id, "enabled": true }));
        assert_eq!(core.services.reminders.pending(), 1);

        let not_bool = run(&mut router, &mut core, "enable_reminder", json!({ "id": id, "enabled": "yes" }));
        assert_eq!(not_bool.error, Some(ErrorCode::InvalidArgs));
        let missing = run(&mut router, &mut core, "enable_reminder", json!({ "id": "r-99", "enabled": true }));
        assert_eq!(missing.error, Some(ErrorCode::ExecutionError));
    }

    #[test]
    fn test_reminder_command_keeps_creating_source() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let result = run(
            &mut router,
            &mut core,
            "add_reminder",
            json!({ "content": "lights", "minutes": 1, "command": "turn_on" }),
        );
        assert!(result.success);
        let reminder = &core.services.reminders.list()[0];
        assert_eq!(reminder.command.as_deref(), Some("turn_on"));
        assert_eq!(reminder.source, CommandSource::Ui);
    }

    #[test]
    fn test_settings_commands() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let current = run(&mut router, &mut core, "get_settings", json!({}));
        assert_eq!(current.data.unwrap()["pet_name"], json!("Lumi"));

        let updated = run(
            &mut router,
            &mut core,
            "update_settings",
            json!({ "default_brightness": 0.4, "pet_name": "Pixel" }),
        );
        assert!(updated.success, "{}", updated.message);
        assert_eq!(updated.message, "2 setting(s) updated");
        assert_eq!(core.services.pet.state().name, "Pixel");

        let invalid = run(&mut router, &mut core, "update_settings", json!({ "volume": 400 }));
        assert_eq!(invalid.error, Some(ErrorCode::InvalidArgs));
        let unknown = run(&mut router, &mut core, "update_settings", json!({ "theme": "dark" }));
        assert_eq!(unknown.error, Some(ErrorCode::InvalidArgs));

        let reset = run(&mut router, &mut core, "reset_settings", json!({ "key": "pet_name" }));
        assert_eq!(reset.message, "1 setting(s) reset");
        assert_eq!(core.services.settings.get().pet_name, "Lumi");
        assert_eq!(core.services.settings.get().default_brightness, 0.4);
    }

    #[test]
    fn test_turn_on_uses_default_brightness_setting() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        run(&mut router, &mut core, "set_brightness", json!({ "value": 0.0 }));
        run(&mut router, &mut core, "update_settings", json!({ "default_brightness": 0.3 }));

        let on = run(&mut router, &mut core, "turn_on", json!({}));
        assert!(on.success);
        assert_eq!(core.services.lighting.state().brightness, 0.3);
    }

    #[test]
    fn test_pomodoro_length_follows_settings() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        run(&mut router, &mut core, "update_settings", json!({ "pomodoro_work": 45 }));
        let result = run(&mut router, &mut core, "start_pomodoro", json!({}));
        assert_eq!(result.message, "pomodoro started, break in 45 minutes");
        assert!(fakes
            .speaker
            .said()
            .contains(&"Focus time. I'll remind you in 45 minutes.".to_string()));
    }

    #[test]
    fn test_shutdown_command_triggers_signal() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        assert!(run(&mut router, &mut core, "shutdown", json!({})).success);
        assert!(core.shutdown.is_triggered());
    }

    #[test]
    fn test_unknown_command() {
        let fakes = Fakes::new();
        let (mut router, mut core) = setup(&fakes);

        let result = run(&mut router, &mut core, "fly_to_moon", json!({}));
        assert_eq!(result.error, Some(ErrorCode::UnknownCommand));
    }
}
