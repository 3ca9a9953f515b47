//! Serial link worker
//!
//! One thread reads newline-terminated frames from the port and publishes
//! them as `serial:received`; another drains the bounded outbound queue.
//! Frames are plain text, `CMD:DATA\n` or `CMD\n`.
//!
//! The device is opened non-blocking so the reader notices `stop()` within
//! one idle slice instead of waiting for the next line.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::SerialConfig;
use crate::events::{topics, MessageBus};

use super::{AdapterError, SerialLink, WorkerAdapter};

const ADAPTER: &str = "serial";
/// Longest the reader sleeps when the port has nothing to read
const READ_IDLE: Duration = Duration::from_millis(20);

/// A decoded text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialFrame {
    pub command: String,
    pub data: Option<String>,
}

impl SerialFrame {
    /// Parse one line; `None` for non-UTF-8 or an empty/invalid command
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?.trim();
        let (command, data) = match text.split_once(':') {
            Some((command, data)) => (command, Some(data.to_string())),
            None => (text, None),
        };

        let valid = !command.is_empty()
            && command
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        valid.then(|| Self {
            command: command.to_string(),
            data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&self.command, self.data.as_deref())
    }
}

/// Encode `CMD:DATA\n` (or `CMD\n` without data)
pub fn encode_frame(command: &str, data: Option<&str>) -> Vec<u8> {
    match data {
        Some(data) => format!("{}:{}\n", command, data).into_bytes(),
        None => format!("{}\n", command).into_bytes(),
    }
}

/// Position update for the lamp head, `POS:<x>,<y>\n`
pub fn position_frame(x: f64, y: f64) -> Vec<u8> {
    let round = |v: f64| (v * 1000.0).round() / 1000.0;
    encode_frame("POS", Some(&format!("{},{}", round(x), round(y))))
}

/// Cloneable, non-blocking handle onto the outbound queue
#[derive(Clone)]
pub struct SerialSender {
    tx: SyncSender<Vec<u8>>,
    running: Arc<AtomicBool>,
}

impl SerialLink for SerialSender {
    fn send(&self, bytes: &[u8]) -> Result<(), AdapterError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(AdapterError::NotRunning(ADAPTER));
        }

        self.tx.try_send(bytes.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => AdapterError::QueueFull(ADAPTER),
            TrySendError::Disconnected(_) => AdapterError::NotRunning(ADAPTER),
        })
    }
}

/// Worker owning the serial port
pub struct SerialWorker {
    config: SerialConfig,
    bus: MessageBus,
    running: Arc<AtomicBool>,
    outbound_tx: SyncSender<Vec<u8>>,
    outbound_rx: Arc<Mutex<Receiver<Vec<u8>>>>,
}

impl SerialWorker {
    pub fn new(config: SerialConfig, bus: MessageBus) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::sync_channel(config.queue_size.max(1));

        Self {
            config,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            outbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
        }
    }

    /// Handle given to modes for outbound frames
    pub fn sender(&self) -> SerialSender {
        SerialSender {
            tx: self.outbound_tx.clone(),
            running: Arc::clone(&self.running),
        }
    }

    /// Start the worker threads over an already-open transport
    pub fn start_with<R, W>(&mut self, reader: R, writer: W) -> Result<(), AdapterError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning(ADAPTER));
        }

        let poll = self.config.poll_interval();
        let idle = poll.min(READ_IDLE);

        let running = Arc::clone(&self.running);
        let bus = self.bus.clone();
        let spawned = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || read_loop(BufReader::new(reader), running, bus, idle));
        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(AdapterError::ThreadSpawn {
                adapter: ADAPTER,
                reason: e.to_string(),
            });
        }

        let running = Arc::clone(&self.running);
        let bus = self.bus.clone();
        let queue = Arc::clone(&self.outbound_rx);
        thread::Builder::new()
            .name("serial-writer".to_string())
            .spawn(move || write_loop(writer, queue, running, bus, poll))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AdapterError::ThreadSpawn {
                    adapter: ADAPTER,
                    reason: e.to_string(),
                }
            })?;

        info!(port = %self.config.port, baudrate = self.config.baudrate, "serial worker started");
        Ok(())
    }

    fn report(&self, reason: &str) {
        self.bus
            .publish(topics::SERIAL_ERROR, json!({ "reason": reason }));
    }
}

impl WorkerAdapter for SerialWorker {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn start(&mut self) -> Result<(), AdapterError> {
        if !self.config.enabled {
            return Err(AdapterError::Unavailable {
                adapter: ADAPTER,
                reason: "disabled in configuration".to_string(),
            });
        }

        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(&self.config.port)
            .and_then(|writer| writer.try_clone().map(|reader| (reader, writer)));

        match port {
            Ok((reader, writer)) => self.start_with(reader, writer),
            Err(e) => {
                let reason = format!("cannot open {}: {}", self.config.port, e);
                self.report(&reason);
                Err(AdapterError::Unavailable {
                    adapter: ADAPTER,
                    reason,
                })
            }
        }
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("serial worker stopping");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn read_loop<R: Read>(
    mut reader: BufReader<R>,
    running: Arc<AtomicBool>,
    bus: MessageBus,
    idle: Duration,
) {
    // Partial lines survive a WouldBlock and are completed by the next read
    let mut line = Vec::with_capacity(128);

    while running.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                debug!("serial port reached end of stream");
                publish_line(&bus, &line);
                break;
            }
            Ok(_) if line.ends_with(b"\n") => {
                publish_line(&bus, &line);
                line.clear();
            }
            Ok(_) => continue,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                thread::sleep(idle);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(?e, "serial read failed");
                bus.publish(topics::SERIAL_ERROR, json!({ "reason": e.to_string() }));
                break;
            }
        }
    }
    debug!("serial reader stopped");
}

fn publish_line(bus: &MessageBus, raw: &[u8]) {
    let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return;
    }

    let mut payload = Map::new();
    payload.insert("bytes".to_string(), json!(trimmed));
    payload.insert(
        "text".to_string(),
        Value::String(String::from_utf8_lossy(trimmed).into_owned()),
    );
    if let Some(frame) = SerialFrame::decode(trimmed) {
        payload.insert("command".to_string(), Value::String(frame.command));
        if let Some(data) = frame.data {
            payload.insert("data".to_string(), Value::String(data));
        }
    }

    bus.publish(topics::SERIAL_RECEIVED, Value::Object(payload));
}

fn write_loop<W: Write>(
    mut writer: W,
    queue: Arc<Mutex<Receiver<Vec<u8>>>>,
    running: Arc<AtomicBool>,
    bus: MessageBus,
    poll: Duration,
) {
    let queue = queue.lock();

    while running.load(Ordering::SeqCst) {
        match queue.recv_timeout(poll) {
            Ok(bytes) => {
                if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                    warn!(?e, "serial write failed");
                    bus.publish(topics::SERIAL_ERROR, json!({ "reason": e.to_string() }));
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("serial writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use std::io::Cursor;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn test_config() -> SerialConfig {
        SerialConfig {
            timeout: 0.02,
            queue_size: 2,
            ..Default::default()
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_frame_codec() {
        assert_eq!(position_frame(0.25, 0.7504), b"POS:0.25,0.75\n".to_vec());
        assert_eq!(encode_frame("status", None), b"status\n".to_vec());

        let frame = SerialFrame::decode(b"echo:hello world\r\n").unwrap();
        assert_eq!(frame.command, "echo");
        assert_eq!(frame.data.as_deref(), Some("hello world"));

        assert!(SerialFrame::decode(b":").is_none());
        assert!(SerialFrame::decode(&[0xff, 0xfe]).is_none());
    }

    #[test]
    fn test_send_requires_running_worker() {
        let worker = SerialWorker::new(test_config(), MessageBus::new());
        let err = worker.sender().send(b"POS:1,2\n").unwrap_err();
        assert!(matches!(err, AdapterError::NotRunning("serial")));
    }

    #[test]
    fn test_disabled_worker_does_not_start() {
        let mut worker = SerialWorker::new(
            SerialConfig {
                enabled: false,
                ..test_config()
            },
            MessageBus::new(),
        );
        assert!(matches!(worker.start(), Err(AdapterError::Unavailable { .. })));
        assert!(!worker.is_running());
    }

    #[test]
    fn test_missing_port_publishes_error() {
        let bus = MessageBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        bus.subscribe(topics::SERIAL_ERROR, move |e: &Event| {
            sink.lock().push(e.clone());
            Ok(())
        });

        let mut worker = SerialWorker::new(
            SerialConfig {
                port: "/nonexistent/tty-lamp".to_string(),
                ..test_config()
            },
            bus,
        );

        assert!(worker.start().is_err());
        assert_eq!(errors.lock().len(), 1);
    }

    #[test]
    fn test_received_lines_are_published() {
        let bus = MessageBus::new();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        bus.subscribe(topics::SERIAL_RECEIVED, move |e: &Event| {
            sink.lock().push(e.clone());
            Ok(())
        });

        let mut worker = SerialWorker::new(test_config(), bus);
        worker
            .start_with(Cursor::new(b"status:ok\n\nplain\n".to_vec()), SharedBuf::default())
            .unwrap();

        assert!(wait_until(|| lines.lock().len() == 2));
        let lines = lines.lock();
        assert_eq!(lines[0].get_str("command"), Some("status"));
        assert_eq!(lines[0].get_str("data"), Some("ok"));
        assert_eq!(lines[1].get_str("text"), Some("plain"));

        worker.stop();
    }

    /// A port with nothing to read that delivers `chunks` one per call
    struct Trickle {
        chunks: Vec<Vec<u8>>,
        reads: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.chunks.is_empty() {
                return Err(ErrorKind::WouldBlock.into());
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_reader_stops_while_port_is_idle() {
        let bus = MessageBus::new();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        bus.subscribe(topics::SERIAL_RECEIVED, move |e: &Event| {
            sink.lock().push(e.get_str("text").map(str::to_string));
            Ok(())
        });

        let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let port = Trickle {
            chunks: vec![b"sta".to_vec(), b"tus:ok\n".to_vec()],
            reads: Arc::clone(&reads),
        };
        let mut worker = SerialWorker::new(test_config(), bus);
        worker.start_with(port, SharedBuf::default()).unwrap();

        assert!(wait_until(|| lines.lock().len() == 1));
        assert_eq!(lines.lock()[0].as_deref(), Some("status:ok"));

        worker.stop();
        thread::sleep(Duration::from_millis(100));
        let after_stop = reads.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(reads.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_outbound_queue_reaches_port() {
        let out = SharedBuf::default();
        let mut worker = SerialWorker::new(test_config(), MessageBus::new());
        worker.start_with(Cursor::new(Vec::new()), out.clone()).unwrap();

        let sender = worker.sender();
        sender.send(&position_frame(10.0, 20.0)).unwrap();

        assert!(wait_until(|| out.0.lock().as_slice() == b"POS:10,20\n"));
        assert!(matches!(
            worker.start_with(Cursor::new(Vec::new()), SharedBuf::default()),
            Err(AdapterError::AlreadyRunning("serial"))
        ));

        worker.stop();
    }
}
