//! Mode lifecycle: the mode trait, the registry of mode factories and the
//! controller that owns the active instance

mod error;
mod mode;
mod mode_controller;
mod registry;

pub use error::{ControllerError, ModeError};
pub use mode::{Mode, ModeContext};
pub use mode_controller::{Delivery, ModeController};
pub use registry::ModeRegistry;
