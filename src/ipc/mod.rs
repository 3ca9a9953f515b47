//! IPC module for front-end communication

mod protocol;
mod server;

pub use protocol::{read_frame, write_frame, Notification, Request, Response, MAX_MESSAGE_LEN};
pub use server::Server;
