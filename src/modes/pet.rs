//! Pet mode: the lamp acts as a desk pet
//!
//! Gestures map to actions, a face appearing gets a greeting, and after a
//! quiet spell the pet plays one of its idle actions on its own. Actions
//! are announced on `pet:action` and, when the head is connected, sent as
//! `ACT:<name>` frames.

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::debug;

use crate::adapters::encode_frame;
use crate::controller::{Mode, ModeContext, ModeError};
use crate::events::{topics, Event};
use crate::state::ModeId;

const IDLE_ACTIONS: [&str; 3] = ["cute", "nod", "shake"];

fn gesture_action(gesture: &str) -> Option<&'static str> {
    match gesture {
        "wave" => Some("wave"),
        "thumbs_up" => Some("happy"),
        "heart" => Some("cute"),
        "peace" => Some("dance"),
        "point" => Some("nod"),
        "palm" => Some("sleep"),
        "fist" => Some("angry"),
        _ => None,
    }
}

fn action_line(action: &str) -> Option<&'static str> {
    match action {
        "wave" => Some("Hi there!"),
        "happy" => Some("Yay!"),
        "nod" => Some("Awesome!"),
        "dance" => Some("Let's dance!"),
        "sleep" => Some("Good night..."),
        _ => None,
    }
}

pub struct PetMode {
    name: String,
    idle_after: Duration,
    last_activity: Instant,
    idle_index: usize,
    face_present: bool,
}

impl PetMode {
    pub fn new(idle_after: Duration, name: &str) -> Self {
        Self {
            name: name.to_string(),
            idle_after,
            last_activity: Instant::now(),
            idle_index: 0,
            face_present: false,
        }
    }

    fn play(&mut self, ctx: &ModeContext, action: &'static str, trigger: &str) {
        debug!(action, trigger, "pet action");
        self.last_activity = Instant::now();

        // A new action interrupts whatever the last one was saying
        if let Some(speaker) = ctx.speaker() {
            speaker.hush();
        }
        if let Some(line) = action_line(action) {
            ctx.say(line);
        }
        ctx.send_serial(&encode_frame("ACT", Some(action)));
        ctx.publish(topics::PET_ACTION, json!({ "action": action, "trigger": trigger }));
    }
}

impl Mode for PetMode {
    fn id(&self) -> ModeId {
        ModeId::Pet
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::VISION_GESTURE, topics::VISION_FACE]
    }

    fn on_enter(&mut self, ctx: &ModeContext) -> Result<(), ModeError> {
        if let Some(vision) = ctx.vision() {
            vision.begin_session("pet");
        }
        self.play(ctx, "wave", "enter");
        ctx.say(&format!("{} is here!", self.name));
        Ok(())
    }

    fn on_exit(&mut self, ctx: &ModeContext) -> Result<(), ModeError> {
        self.play(ctx, "sleep", "exit");
        if let Some(vision) = ctx.vision() {
            vision.end_session();
        }
        Ok(())
    }

    fn update(&mut self, ctx: &ModeContext) -> bool {
        if self.last_activity.elapsed() >= self.idle_after {
            let action = IDLE_ACTIONS[self.idle_index % IDLE_ACTIONS.len()];
            self.idle_index += 1;
            self.play(ctx, action, "idle");
        }
        true
    }

    fn handle_event(&mut self, ctx: &ModeContext, event: &Event) {
        match event.topic.as_str() {
            topics::VISION_GESTURE => {
                let Some(name) = event.get_str("name") else {
                    return;
                };
                match gesture_action(name) {
                    Some(action) => self.play(ctx, action, "gesture"),
                    None => debug!(gesture = name, "gesture has no pet action"),
                }
            }
            topics::VISION_FACE => {
                let present = event.get_bool("present").unwrap_or(false);
                if present && !self.face_present {
                    self.play(ctx, "happy", "face");
                    ctx.say("Nice to see you!");
                }
                self.face_present = present;
            }
            _ => {}
        }
    }
}
