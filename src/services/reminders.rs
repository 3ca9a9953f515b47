//! Reminder book shared between the command handlers and the scheduler

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, TimeZone};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::command::CommandSource;

use super::JsonStore;

const RECORD: &str = "reminders";

/// Accepted values of a reminder's `repeat`
pub const REPEATS: &[&str] = &["none", "hourly", "daily", "weekly", "custom"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
    /// Every `every_minutes` minutes
    Custom,
}

impl Repeat {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Repeat::None),
            "hourly" => Some(Repeat::Hourly),
            "daily" => Some(Repeat::Daily),
            "weekly" => Some(Repeat::Weekly),
            "custom" => Some(Repeat::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub content: String,
    pub due_at: DateTime<Local>,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(default)]
    pub every_minutes: u32,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub trigger_count: u64,
    /// Command executed instead of announcing `content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    /// Source the command is dispatched with when the reminder fires
    #[serde(default = "timer_source")]
    pub source: CommandSource,
}

fn enabled() -> bool {
    true
}

fn timer_source() -> CommandSource {
    CommandSource::Timer
}

impl Reminder {
    /// Next trigger time after firing at `now`, or `None` for one-shots
    fn next_due(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match self.repeat {
            Repeat::None => None,
            Repeat::Hourly => Some(now + Duration::hours(1)),
            Repeat::Custom if self.every_minutes > 0 => {
                Some(now + Duration::minutes(i64::from(self.every_minutes)))
            }
            Repeat::Custom => None,
            Repeat::Daily | Repeat::Weekly => {
                let period = if self.repeat == Repeat::Daily {
                    Duration::days(1)
                } else {
                    Duration::weeks(1)
                };
                // Keep the wall-clock slot; missed occurrences are skipped
                let mut next = self.due_at + period;
                while next <= now {
                    next = next + period;
                }
                Some(next)
            }
        }
    }
}

/// A reminder about to be added to the book
#[derive(Debug, Clone)]
pub struct NewReminder {
    content: String,
    due_at: DateTime<Local>,
    repeat: Repeat,
    every_minutes: u32,
    command: Option<(String, Map<String, Value>)>,
    source: CommandSource,
}

impl NewReminder {
    pub fn at(content: &str, due_at: DateTime<Local>) -> Self {
        Self {
            content: content.to_string(),
            due_at,
            repeat: Repeat::None,
            every_minutes: 0,
            command: None,
            source: CommandSource::Timer,
        }
    }

    pub fn after(content: &str, delay: Duration) -> Self {
        Self::at(content, Local::now() + delay)
    }

    pub fn repeating(mut self, repeat: Repeat, every_minutes: u32) -> Self {
        self.repeat = repeat;
        self.every_minutes = every_minutes;
        self
    }

    /// Run `command` with `source` instead of announcing the content
    pub fn with_command(mut self, command: &str, args: Map<String, Value>, source: CommandSource) -> Self {
        self.command = Some((command.to_string(), args));
        self.source = source;
        self
    }
}

/// Parse `HH:MM` (next occurrence), `YYYY-MM-DD HH:MM` or RFC 3339
pub fn parse_time(text: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Local));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M") {
        return Local.from_local_datetime(&naive).earliest();
    }

    let time = NaiveTime::parse_from_str(text, "%H:%M").ok()?;
    let today = Local.from_local_datetime(&now.date_naive().and_time(time)).earliest()?;
    if today > now {
        Some(today)
    } else {
        Some(today + Duration::days(1))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Book {
    reminders: Vec<Reminder>,
    next_id: u64,
}

/// Cloneable handle onto the reminder list
#[derive(Clone)]
pub struct ReminderBook {
    book: Arc<Mutex<Book>>,
    store: JsonStore,
}

impl ReminderBook {
    pub fn load(store: JsonStore) -> Self {
        let book = store.load(RECORD).unwrap_or_default();
        Self {
            book: Arc::new(Mutex::new(book)),
            store,
        }
    }

    pub fn add(&self, new: NewReminder) -> Reminder {
        let mut book = self.book.lock();
        book.next_id += 1;

        let (command, args) = match new.command {
            Some((command, args)) => (Some(command), args),
            None => (None, Map::new()),
        };
        let reminder = Reminder {
            id: format!("r-{}", book.next_id),
            content: new.content,
            due_at: new.due_at,
            repeat: new.repeat,
            every_minutes: new.every_minutes,
            enabled: true,
            trigger_count: 0,
            command,
            args,
            source: new.source,
        };
        book.reminders.push(reminder.clone());
        self.store.save(RECORD, &*book);

        info!(id = %reminder.id, due_at = %reminder.due_at, repeat = ?reminder.repeat, "reminder added");
        reminder
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut book = self.book.lock();
        let before = book.reminders.len();
        book.reminders.retain(|r| r.id != id);

        let removed = book.reminders.len() != before;
        if removed {
            self.store.save(RECORD, &*book);
        }
        removed
    }

    /// Enable or disable a reminder; false if there is no such id
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut book = self.book.lock();
        let Some(reminder) = book.reminders.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        reminder.enabled = enabled;
        self.store.save(RECORD, &*book);
        true
    }

    /// Every reminder, soonest first
    pub fn list(&self) -> Vec<Reminder> {
        let mut reminders = self.book.lock().reminders.clone();
        reminders.sort_by_key(|r| r.due_at);
        reminders
    }

    pub fn pending(&self) -> usize {
        self.book.lock().reminders.iter().filter(|r| r.enabled).count()
    }

    /// Every enabled reminder due at or before `now`
    ///
    /// One-shot reminders are removed; repeating ones move to their next
    /// occurrence.
    pub fn take_due(&self, now: DateTime<Local>) -> Vec<Reminder> {
        let mut book = self.book.lock();
        let mut due = Vec::new();

        book.reminders.retain_mut(|reminder| {
            if !reminder.enabled || reminder.due_at > now {
                return true;
            }
            reminder.trigger_count += 1;
            due.push(reminder.clone());

            match reminder.next_due(now) {
                Some(next) => {
                    reminder.due_at = next;
                    true
                }
                None => false,
            }
        });

        if !due.is_empty() {
            self.store.save(RECORD, &*book);
            due.sort_by_key(|r| r.due_at);
        }
        due
    }
}
