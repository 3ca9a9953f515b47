//! Standby: the idle mode the lamp starts in and falls back to

use tracing::debug;

use crate::adapters::encode_frame;
use crate::controller::{Mode, ModeContext, ModeError};
use crate::state::ModeId;

#[derive(Debug, Default)]
pub struct StandbyMode;

impl Mode for StandbyMode {
    fn id(&self) -> ModeId {
        ModeId::Standby
    }

    fn on_enter(&mut self, ctx: &ModeContext) -> Result<(), ModeError> {
        // Park the head; a missing or busy link is fine here
        if !ctx.send_serial(&encode_frame("HOME", None)) {
            debug!("lamp head not parked, serial link unavailable");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::testing::Fakes;

    #[test]
    fn test_enter_parks_head() {
        let fakes = Fakes::new();
        let mut mode = StandbyMode;

        mode.on_enter(&fakes.context()).unwrap();
        assert_eq!(fakes.serial.frames(), vec!["HOME"]);
        assert!(mode.update(&fakes.context()));
    }
}
