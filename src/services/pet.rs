//! Desk pet record: stats, mood and interaction responses

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::JsonStore;

const RECORD: &str = "pet";

/// Interactions accepted by [`Pet::interact`]
pub const INTERACTIONS: &[&str] = &["pet", "play", "talk", "feed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Excited,
    Happy,
    Normal,
    Bored,
    Sad,
    Sleepy,
}

impl Mood {
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Excited => "excited",
            Mood::Happy => "happy",
            Mood::Normal => "normal",
            Mood::Bored => "bored",
            Mood::Sad => "sad",
            Mood::Sleepy => "sleepy",
        }
    }
}

/// Persisted pet stats, each in `0..=100`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PetState {
    pub name: String,
    pub happiness: i32,
    pub energy: i32,
    pub affection: i32,
    pub satiety: i32,
    pub total_interactions: u64,
    pub last_interaction: Option<DateTime<Local>>,
}

impl Default for PetState {
    fn default() -> Self {
        Self {
            name: "Lumi".to_string(),
            happiness: 50,
            energy: 80,
            affection: 30,
            satiety: 70,
            total_interactions: 0,
            last_interaction: None,
        }
    }
}

impl PetState {
    /// Sleepy beats sad beats bored beats excited beats happy
    pub fn mood(&self) -> Mood {
        if self.energy < 20 {
            Mood::Sleepy
        } else if self.happiness < 25 {
            Mood::Sad
        } else if self.happiness < 40 && self.affection < 40 {
            Mood::Bored
        } else if self.happiness > 85 && self.energy > 60 {
            Mood::Excited
        } else if self.happiness > 55 {
            Mood::Happy
        } else {
            Mood::Normal
        }
    }
}

/// Stat deltas: happiness, affection, energy, satiety
fn effects(action: &str) -> Option<[i32; 4]> {
    match action {
        "pet" => Some([5, 2, -1, 0]),
        "play" => Some([10, 3, -8, 0]),
        "talk" => Some([3, 1, -1, 0]),
        "feed" => Some([5, 0, 5, 20]),
        _ => None,
    }
}

fn response(action: &str, mood: Mood) -> &'static str {
    match (action, mood) {
        ("pet", Mood::Happy | Mood::Excited) => "Hehe, that feels nice!",
        ("pet", Mood::Sleepy) => "Mmm... let me nap a little longer...",
        ("play", Mood::Excited) => "So much fun! Again!",
        ("play", Mood::Sleepy) => "Too tired to play...",
        ("talk", Mood::Happy) => "I love chatting with you!",
        ("feed", Mood::Happy | Mood::Excited) => "Yum, thank you!",
        (_, Mood::Excited) => "Awesome!",
        (_, Mood::Happy) => "Happy~",
        (_, Mood::Bored) => "So bored...",
        (_, Mood::Sad) => "Hmm...",
        (_, Mood::Sleepy) => "So sleepy...",
        (_, Mood::Normal) => "Mm-hm.",
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown interaction '{0}'")]
pub struct UnknownInteraction(pub String);

pub struct Pet {
    state: PetState,
    store: JsonStore,
}

impl Pet {
    pub fn load(store: JsonStore) -> Self {
        let state = store.load(RECORD).unwrap_or_default();
        Self { state, store }
    }

    pub fn state(&self) -> &PetState {
        &self.state
    }

    pub fn mood(&self) -> Mood {
        self.state.mood()
    }

    pub fn rename(&mut self, name: &str) {
        if self.state.name != name {
            self.state.name = name.to_string();
            self.store.save(RECORD, &self.state);
        }
    }

    /// Apply an interaction and return the pet's reply
    pub fn interact(&mut self, action: &str) -> Result<Interaction, UnknownInteraction> {
        let [happiness, affection, energy, satiety] =
            effects(action).ok_or_else(|| UnknownInteraction(action.to_string()))?;

        let bump = |stat: &mut i32, delta: i32| *stat = (*stat + delta).clamp(0, 100);
        bump(&mut self.state.happiness, happiness);
        bump(&mut self.state.affection, affection);
        bump(&mut self.state.energy, energy);
        bump(&mut self.state.satiety, satiety);
        self.state.total_interactions += 1;
        self.state.last_interaction = Some(Local::now());
        self.store.save(RECORD, &self.state);

        let mood = self.state.mood();
        Ok(Interaction {
            action: action.to_string(),
            mood,
            message: response(action, mood).to_string(),
        })
    }

    pub fn status(&self) -> Value {
        json!({
            "name": self.state.name,
            "mood": self.mood().as_str(),
            "happiness": self.state.happiness,
            "energy": self.state.energy,
            "affection": self.state.affection,
            "total_interactions": self.state.total_interactions,
        })
    }
}

/// Outcome of one interaction
#[derive(Debug, Clone, Serialize)]
pub struct Interaction {
    pub action: String,
    pub mood: Mood,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mood_priority() {
        let mut state = PetState {
            energy: 10,
            happiness: 10,
            ..Default::default()
        };
        assert_eq!(state.mood(), Mood::Sleepy);

        state.energy = 70;
        assert_eq!(state.mood(), Mood::Sad);

        state.happiness = 90;
        assert_eq!(state.mood(), Mood::Excited);

        state.happiness = 50;
        assert_eq!(state.mood(), Mood::Normal);
    }

    #[test]
    fn test_interact_updates_stats() {
        let store = JsonStore::in_memory();
        let mut pet = Pet::load(store.clone());

        let reply = pet.interact("play").unwrap();
        assert_eq!(reply.action, "play");
        assert_eq!(pet.state().happiness, 60);
        assert_eq!(pet.state().energy, 72);
        assert_eq!(pet.state().total_interactions, 1);

        let saved: PetState = store.load("pet").unwrap();
        assert_eq!(saved.happiness, 60);
    }

    #[test]
    fn test_stats_are_clamped() {
        let mut pet = Pet::load(JsonStore::in_memory());
        for _ in 0..10 {
            pet.interact("feed").unwrap();
        }
        assert_eq!(pet.state().satiety, 100);
        assert_eq!(pet.state().energy, 100);
    }

    #[test]
    fn test_rename_is_persisted() {
        let store = JsonStore::in_memory();
        Pet::load(store.clone()).rename("Pixel");
        assert_eq!(Pet::load(store).status()["name"], json!("Pixel"));
    }

    #[test]
    fn test_unknown_interaction() {
        let mut pet = Pet::load(JsonStore::in_memory());
        assert!(pet.interact("scold").is_err());
        assert_eq!(pet.state().total_interactions, 0);
    }
}
