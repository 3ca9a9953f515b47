//! Study log: the running session and lifetime totals

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::JsonStore;

const RECORD: &str = "study";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySession {
    pub id: String,
    /// `study` or `pomodoro`
    pub kind: String,
    pub started_at: DateTime<Local>,
    pub pomodoros: u32,
}

impl StudySession {
    pub fn elapsed_minutes(&self, now: DateTime<Local>) -> f64 {
        let secs = (now - self.started_at).num_seconds().max(0) as f64;
        (secs / 6.0).round() / 10.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyLog {
    pub active: Option<StudySession>,
    pub total_sessions: u64,
    pub total_minutes: f64,
    pub total_pomodoros: u64,
    pub longest_session: f64,
    next_id: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    #[error("a {0} session is already running")]
    AlreadyActive(String),

    #[error("no study session is running")]
    NotActive,
}

pub struct Study {
    log: StudyLog,
    store: JsonStore,
}

impl Study {
    pub fn load(store: JsonStore) -> Self {
        let log = store.load(RECORD).unwrap_or_default();
        Self { log, store }
    }

    pub fn log(&self) -> &StudyLog {
        &self.log
    }

    pub fn active(&self) -> Option<&StudySession> {
        self.log.active.as_ref()
    }

    pub fn start(&mut self, kind: &str) -> Result<&StudySession, StudyError> {
        if let Some(active) = &self.log.active {
            return Err(StudyError::AlreadyActive(active.kind.clone()));
        }

        self.log.next_id += 1;
        let session = StudySession {
            id: format!("s-{}", self.log.next_id),
            kind: kind.to_string(),
            started_at: Local::now(),
            pomodoros: 0,
        };
        self.log.active = Some(session);
        self.store.save(RECORD, &self.log);

        self.log.active.as_ref().ok_or(StudyError::NotActive)
    }

    /// Close the running session; returns it with its length in minutes
    pub fn end(&mut self) -> Result<(StudySession, f64), StudyError> {
        let session = self.log.active.take().ok_or(StudyError::NotActive)?;
        let minutes = session.elapsed_minutes(Local::now());

        self.log.total_sessions += 1;
        self.log.total_minutes += minutes;
        self.log.total_pomodoros += u64::from(session.pomodoros);
        self.log.longest_session = self.log.longest_session.max(minutes);
        self.store.save(RECORD, &self.log);

        Ok((session, minutes))
    }

    /// Count a finished pomodoro against the running session
    pub fn add_pomodoro(&mut self) -> Result<u32, StudyError> {
        let session = self.log.active.as_mut().ok_or(StudyError::NotActive)?;
        session.pomodoros += 1;
        let count = session.pomodoros;
        self.store.save(RECORD, &self.log);
        Ok(count)
    }

    pub fn status(&self) -> Value {
        json!({
            "active": self.log.active.as_ref().map(|s| json!({
                "id": s.id,
                "kind": s.kind,
                "minutes": s.elapsed_minutes(Local::now()),
                "pomodoros": s.pomodoros,
            })),
            "total_sessions": self.log.total_sessions,
            "total_minutes": self.log.total_minutes,
            "total_pomodoros": self.log.total_pomodoros,
        })
    }
}
