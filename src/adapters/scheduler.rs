//! Reminder scheduler
//!
//! Polls the [`ReminderBook`] and publishes `schedule:reminder_due` for
//! every reminder whose time has come. Fired one-shot reminders are
//! removed from the book and repeating ones are rescheduled, so the
//! consumer must be subscribed before the scheduler starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::events::{topics, MessageBus};
use crate::services::{Reminder, ReminderBook};

use super::{AdapterError, WorkerAdapter};

const ADAPTER: &str = "scheduler";
const SLICE: Duration = Duration::from_millis(50);

pub struct ReminderScheduler {
    book: ReminderBook,
    bus: MessageBus,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl ReminderScheduler {
    pub fn new(book: ReminderBook, bus: MessageBus, interval: Duration) -> Self {
        Self {
            book,
            bus,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish everything due now; returns how many fired
    #[cfg(test)]
    pub fn check_now(&self) -> usize {
        fire_due(&self.book, &self.bus)
    }
}

fn fire_due(book: &ReminderBook, bus: &MessageBus) -> usize {
    let due = book.take_due(Local::now());
    for reminder in &due {
        info!(id = %reminder.id, content = %reminder.content, "reminder due");
        bus.publish(topics::REMINDER_DUE, Value::Object(payload(reminder)));
    }
    due.len()
}

fn payload(reminder: &Reminder) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("id".to_string(), Value::String(reminder.id.clone()));
    payload.insert("content".to_string(), Value::String(reminder.content.clone()));
    payload.insert("trigger_count".to_string(), Value::from(reminder.trigger_count));
    if let Some(command) = &reminder.command {
        payload.insert("command".to_string(), Value::String(command.clone()));
        payload.insert("args".to_string(), Value::Object(reminder.args.clone()));
        payload.insert("source".to_string(), Value::String(reminder.source.as_str().to_string()));
    }
    payload
}

impl WorkerAdapter for ReminderScheduler {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn start(&mut self) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning(ADAPTER));
        }

        let running = Arc::clone(&self.running);
        let book = self.book.clone();
        let bus = self.bus.clone();
        let interval = self.interval;

        thread::Builder::new()
            .name("reminder-scheduler".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    fire_due(&book, &bus);

                    // Sleep in short slices so stop() is noticed promptly
                    let mut waited = Duration::ZERO;
                    while waited < interval && running.load(Ordering::SeqCst) {
                        thread::sleep(SLICE);
                        waited += SLICE;
                    }
                }
                debug!("reminder scheduler stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AdapterError::ThreadSpawn {
                    adapter: ADAPTER,
                    reason: e.to_string(),
                }
            })?;

        info!(interval_ms = self.interval.as_millis() as u64, "reminder scheduler started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSource;
    use crate::events::Event;
    use crate::services::{JsonStore, NewReminder};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Instant;

    fn collect(bus: &MessageBus) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(topics::REMINDER_DUE, move |e: &Event| {
            sink.lock().push(e.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn test_due_reminder_fires_once() {
        let bus = MessageBus::new();
        let seen = collect(&bus);
        let book = ReminderBook::load(JsonStore::in_memory());

        let mut args = Map::new();
        args.insert("value".to_string(), json!(0.3));
        book.add(NewReminder::after("dim", chrono::Duration::zero()).with_command(
            "set_brightness",
            args,
            CommandSource::Ui,
        ));
        book.add(NewReminder::after("later", chrono::Duration::minutes(10)));

        let scheduler = ReminderScheduler::new(book.clone(), bus, Duration::from_secs(1));
        assert_eq!(scheduler.check_now(), 1);
        assert_eq!(scheduler.check_now(), 0);

        let events = seen.lock();
        assert_eq!(events[0].get_str("command"), Some("set_brightness"));
        assert_eq!(events[0].payload["args"]["value"], json!(0.3));
        assert_eq!(events[0].get_str("source"), Some("ui"));
        assert_eq!(book.list().len(), 1);
    }

    #[test]
    fn test_plain_reminder_has_no_command() {
        let bus = MessageBus::new();
        let seen = collect(&bus);
        let book = ReminderBook::load(JsonStore::in_memory());
        book.add(NewReminder::after("drink water", chrono::Duration::zero()));

        let mut scheduler = ReminderScheduler::new(book, bus, Duration::from_millis(20));
        scheduler.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_str("content"), Some("drink water"));
        assert!(events[0].payload.get("command").is_none());
    }
}
