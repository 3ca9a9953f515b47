//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::command::{CommandResult, CommandSource, ControlMode, HistoryEntry};
use crate::events::{topics, Event};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from front-ends to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Run a named command
    Execute {
        name: String,
        #[serde(default)]
        args: Map<String, Value>,
        #[serde(default = "default_source")]
        source: CommandSource,
    },

    /// Run a transcribed utterance as a voice command
    Voice { text: String },

    GetControlMode,

    SetControlMode { mode: ControlMode },

    /// Most recent commands, oldest first
    History {
        #[serde(default = "default_history_limit")]
        limit: usize,
    },

    /// Subscribe to mode and control-mode change notifications
    Subscribe,
}

fn default_source() -> CommandSource {
    CommandSource::Ui
}

fn default_history_limit() -> usize {
    20
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    Status { status: Value },

    /// Outcome of `execute` or `voice`
    Result(CommandResult),

    ControlMode {
        mode: ControlMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<ControlMode>,
    },

    History { entries: Vec<HistoryEntry> },

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification for subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ModeChanged {
        from: String,
        to: String,
        generation: u64,
    },
    ControlChanged {
        mode: String,
        previous: String,
    },
}

impl Notification {
    /// Notification for a bus event, if it is one clients care about
    pub fn from_event(event: &Event) -> Option<Self> {
        let text = |key: &str| event.get_str(key).unwrap_or_default().to_string();
        match event.topic.as_str() {
            topics::MODE_CHANGED => Some(Self::ModeChanged {
                from: text("from"),
                to: text("to"),
                generation: event
                    .payload
                    .get("generation")
                    .and_then(Value::as_u64)
                    .unwrap_or_default(),
            }),
            topics::CONTROL_CHANGED => Some(Self::ControlChanged {
                mode: text("mode"),
                previous: text("previous"),
            }),
            _ => None,
        }
    }
}

/// Write one length-prefixed message
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = (body.len() as u32).to_le_bytes();
    writer.write_all(&len).await?;
    writer.write_all(body).await?;
    Ok(())
}

/// Read one length-prefixed message; `None` on a clean disconnect
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        bail!("message of {} bytes exceeds the {} byte limit", len, MAX_MESSAGE_LEN);
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req: Request = serde_json::from_value(json!({
            "type": "execute",
            "name": "set_brightness",
            "args": { "value": 0.5 },
        }))
        .unwrap();
        match req {
            Request::Execute { name, args, source } => {
                assert_eq!(name, "set_brightness");
                assert_eq!(args["value"], json!(0.5));
                assert_eq!(source, CommandSource::Ui);
            }
            other => panic!("unexpected request {:?}", other),
        }

        let json = serde_json::to_string(&Request::SetControlMode { mode: ControlMode::UiVoice }).unwrap();
        assert!(json.contains("set_control_mode"));
        assert!(json.contains("ui_voice"));
    }

    #[test]
    fn test_result_response_is_flat() {
        let resp = Response::Result(CommandResult::ok("light on", None));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["type"], json!("result"));
        assert_eq!(value["success"], json!(true));
    }

    #[test]
    fn test_notification_from_event() {
        let event = Event::new(
            topics::MODE_CHANGED,
            json!({ "from": "standby", "to": "pet", "generation": 3 }),
        );
        assert_eq!(
            Notification::from_event(&event),
            Some(Notification::ModeChanged {
                from: "standby".to_string(),
                to: "pet".to_string(),
                generation: 3,
            })
        );
        assert_eq!(Notification::from_event(&Event::new("vision:hand", json!({}))), None);
    }

    #[tokio::test]
    async fn test_frames_round_trip_and_limit() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"{\"type\":\"ping\"}").await.unwrap();
        let body = read_frame(&mut b).await.unwrap().unwrap();
        assert!(matches!(serde_json::from_slice::<Request>(&body).unwrap(), Request::Ping));

        a.write_all(&(MAX_MESSAGE_LEN as u32 + 1).to_le_bytes()).await.unwrap();
        assert!(read_frame(&mut b).await.is_err());

        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }
}
