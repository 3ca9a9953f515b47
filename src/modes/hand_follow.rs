//! Hand follow: the lamp head tracks the user's hand
//!
//! Hand positions arrive as normalized `vision:hand` coordinates. They are
//! smoothed with an exponential moving average and sent to the head as
//! `POS:x,y` frames, at most once per send interval.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::adapters::{encode_frame, position_frame};
use crate::controller::{Mode, ModeContext, ModeError};
use crate::events::{topics, Event};
use crate::state::ModeId;

/// Weight of the newest sample
const SMOOTHING: f64 = 0.3;

pub struct HandFollowMode {
    send_interval: Duration,
    last_sent: Option<Instant>,
    smoothed: Option<(f64, f64)>,
}

impl HandFollowMode {
    pub fn new(send_interval: Duration) -> Self {
        Self {
            send_interval,
            last_sent: None,
            smoothed: None,
        }
    }

    fn track(&mut self, ctx: &ModeContext, x: f64, y: f64) {
        let (x, y) = (x.clamp(0.0, 1.0), y.clamp(0.0, 1.0));
        let (x, y) = match self.smoothed {
            Some((sx, sy)) => (
                SMOOTHING * x + (1.0 - SMOOTHING) * sx,
                SMOOTHING * y + (1.0 - SMOOTHING) * sy,
            ),
            None => (x, y),
        };
        self.smoothed = Some((x, y));

        let now = Instant::now();
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.send_interval {
                return;
            }
        }

        if ctx.send_serial(&position_frame(x, y)) {
            self.last_sent = Some(now);
        }
    }
}

impl Mode for HandFollowMode {
    fn id(&self) -> ModeId {
        ModeId::HandFollow
    }

    fn topics(&self) -> &'static [&'static str] {
        &[topics::VISION_HAND, topics::VISION_ERROR]
    }

    fn on_enter(&mut self, ctx: &ModeContext) -> Result<(), ModeError> {
        let vision = ctx.vision().ok_or_else(|| ModeError::Enter {
            mode: ModeId::HandFollow,
            reason: "no camera available".to_string(),
        })?;
        vision.begin_session("hand_follow");
        Ok(())
    }

    fn on_exit(&mut self, ctx: &ModeContext) -> Result<(), ModeError> {
        if let Some(vision) = ctx.vision() {
            vision.end_session();
        }
        ctx.send_serial(&encode_frame("HOME", None));
        Ok(())
    }

    fn handle_event(&mut self, ctx: &ModeContext, event: &Event) {
        match event.topic.as_str() {
            topics::VISION_HAND => match (event.get_f64("x"), event.get_f64("y")) {
                (Some(x), Some(y)) => self.track(ctx, x, y),
                _ => debug!(%event, "hand event without coordinates"),
            },
            topics::VISION_ERROR => {
                // Hold the last position and wait for the camera to recover
                warn!(reason = event.get_str("reason").unwrap_or("unknown"), "lost hand tracking");
                self.smoothed = None;
            }
            _ => {}
        }
    }
}
