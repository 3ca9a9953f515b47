//! Study mode: a pomodoro work block
//!
//! The lamp stays lit for one work block, then announces the break,
//! publishes `study:finished` and reports itself done so the controller
//! falls back to standby.

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::info;

use crate::controller::{Mode, ModeContext, ModeError};
use crate::events::topics;
use crate::state::ModeId;

pub struct StudyMode {
    work: Duration,
    started: Instant,
}

impl StudyMode {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            started: Instant::now(),
        }
    }

    fn minutes(&self) -> u64 {
        self.work.as_secs() / 60
    }
}

impl Mode for StudyMode {
    fn id(&self) -> ModeId {
        ModeId::Study
    }

    fn on_enter(&mut self, ctx: &ModeContext) -> Result<(), ModeError> {
        self.started = Instant::now();
        ctx.say(&format!("Focus time. I'll remind you in {} minutes.", self.minutes()));
        Ok(())
    }

    fn update(&mut self, ctx: &ModeContext) -> bool {
        if self.started.elapsed() < self.work {
            return true;
        }

        info!(minutes = self.minutes(), "work block finished");
        ctx.say("Time for a break!");
        ctx.publish(topics::STUDY_FINISHED, json!({ "minutes": self.minutes() }));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::modes::testing::Fakes;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_runs_until_work_block_ends() {
        let fakes = Fakes::new();
        let ctx = fakes.context();
        let mut mode = StudyMode::new(Duration::from_secs(25 * 60));

        mode.on_enter(&ctx).unwrap();
        assert!(mode.update(&ctx));
        assert_eq!(
            fakes.speaker.said(),
            vec!["Focus time. I'll remind you in 25 minutes."]
        );
    }

    #[test]
    fn test_finish_publishes_and_stops() {
        let fakes = Fakes::new();
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&finished);
        fakes.bus.subscribe(topics::STUDY_FINISHED, move |e: &Event| {
            sink.lock().push(e.clone());
            Ok(())
        });

        let ctx = fakes.context();
        let mut mode = StudyMode::new(Duration::ZERO);
        mode.on_enter(&ctx).unwrap();

        assert!(!mode.update(&ctx));
        assert_eq!(finished.lock().len(), 1);
        assert_eq!(fakes.speaker.said().last().map(String::as_str), Some("Time for a break!"));
    }
}
