//! Voice phrase mapping
//!
//! Speech recognition happens elsewhere; this maps an already-transcribed
//! utterance to a command name and arguments. Phrases carrying a value
//! (brightness percentages and steps, reminders) are matched first, then
//! a fixed keyword table in priority order. Keywords only match whole
//! words.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

static REMIND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)remind me in (\d+)\s*(?:minutes?|mins?) to (.+)").expect("valid reminder pattern")
});

static BRIGHTNESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)brightness (?:to )?(\d{1,3})\s*(?:%|percent)?").expect("valid brightness pattern")
});

static STEP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:brightness|light|lights|lamp)\s+(up|down)\b(?:\s+by\s+(\d{1,3})\s*(?:%|percent)?)?")
        .expect("valid brightness step pattern")
});

static KEYWORD_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    KEYWORDS
        .iter()
        .map(|(phrase, _, _)| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase))).expect("valid keyword pattern")
        })
        .collect()
});

/// Keyword, command, fixed arguments
const KEYWORDS: &[(&str, &str, Option<(&str, &str)>)] = &[
    ("follow me", "enter_hand_follow", None),
    ("hand follow", "enter_hand_follow", None),
    ("pet mode", "enter_pet_mode", None),
    ("play with me", "enter_pet_mode", None),
    ("start studying", "start_study", None),
    ("stop studying", "end_study", None),
    ("end study", "end_study", None),
    ("study mode", "enter_study_mode", None),
    ("focus mode", "enter_study_mode", None),
    ("pomodoro", "start_pomodoro", None),
    ("standby", "enter_standby", None),
    ("take a break", "enter_standby", None),
    ("lights on", "turn_on", None),
    ("turn on the light", "turn_on", None),
    ("lights off", "turn_off", None),
    ("turn off the light", "turn_off", None),
    ("brightest", "set_brightness", Some(("value", "1.0"))),
    ("darkest", "set_brightness", Some(("value", "0.1"))),
    ("brighter", "brightness_up", None),
    ("turn it up", "brightness_up", None),
    ("raise the light", "brightness_up", None),
    ("dimmer", "brightness_down", None),
    ("darker", "brightness_down", None),
    ("turn it down", "brightness_down", None),
    ("dim the light", "brightness_down", None),
    ("pat your head", "pet_interact", Some(("action", "pet"))),
    ("play a game", "pet_interact", Some(("action", "play"))),
    ("let's chat", "pet_interact", Some(("action", "talk"))),
    ("feed", "pet_interact", Some(("action", "feed"))),
    ("my reminders", "list_reminders", None),
    ("list reminders", "list_reminders", None),
    ("status", "get_status", None),
    ("shut down", "shutdown", None),
];

/// A recognized utterance
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceIntent {
    pub command: &'static str,
    pub args: Map<String, Value>,
}

impl VoiceIntent {
    fn bare(command: &'static str) -> Self {
        Self {
            command,
            args: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }
}

/// Map an utterance to a command, or `None` when nothing matches
pub fn parse_utterance(text: &str) -> Option<VoiceIntent> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = REMIND_RE.captures(text) {
        let minutes: i64 = caps[1].parse().ok()?;
        let content = caps[2].trim().trim_end_matches(['.', '!']);
        return Some(
            VoiceIntent::bare("add_reminder")
                .with("minutes", json!(minutes))
                .with("content", json!(content)),
        );
    }

    if let Some(caps) = BRIGHTNESS_RE.captures(text) {
        let percent: f64 = caps[1].parse().ok()?;
        return Some(VoiceIntent::bare("set_brightness").with("value", json!(percent / 100.0)));
    }

    if let Some(caps) = STEP_RE.captures(text) {
        let command = if caps[1].eq_ignore_ascii_case("up") {
            "brightness_up"
        } else {
            "brightness_down"
        };
        let intent = VoiceIntent::bare(command);
        return Some(match caps.get(2).and_then(|m| m.as_str().parse::<f64>().ok()) {
            Some(percent) => intent.with("step", json!(percent / 100.0)),
            None => intent,
        });
    }

    KEYWORDS
        .iter()
        .zip(KEYWORD_RES.iter())
        .find(|(_, re)| re.is_match(text))
        .map(|((_, command, arg), _)| {
            let intent = VoiceIntent::bare(*command);
            match arg {
                Some((key, raw)) => {
                    let value = raw
                        .parse::<f64>()
                        .map(|n| json!(n))
                        .unwrap_or_else(|_| json!(raw));
                    intent.with(key, value)
                }
                None => intent,
            }
        })
}
