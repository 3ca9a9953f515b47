//! Process lifecycle

mod shutdown;

pub use shutdown::{os_signal, ShutdownSignal};
