//! Vision worker
//!
//! Detection itself happens outside the daemon; the worker consumes a
//! stream of [`Detection`]s and, while a capture session is open,
//! republishes them as `vision:*` events.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use crate::config::VisionConfig;
use crate::events::{topics, Event, MessageBus};

use super::{AdapterError, VisionControl, WorkerAdapter};

const ADAPTER: &str = "vision";

/// One observation from the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detection {
    Gesture {
        name: String,
    },
    Hand {
        x: f64,
        y: f64,
    },
    Face {
        present: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
    },
}

impl Detection {
    pub fn topic(&self) -> &'static str {
        match self {
            Detection::Gesture { .. } => topics::VISION_GESTURE,
            Detection::Hand { .. } => topics::VISION_HAND,
            Detection::Face { .. } => topics::VISION_FACE,
        }
    }

    pub fn into_event(self) -> Event {
        let topic = self.topic();
        let mut payload = serde_json::to_value(&self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut payload {
            map.remove("kind");
        }
        Event::new(topic, payload)
    }
}

/// Blocking supplier of detections
pub trait DetectionSource: Send {
    /// Next detection; `Ok(None)` once the source is exhausted
    fn next_detection(&mut self) -> Result<Option<Detection>, AdapterError>;
}

/// Detections encoded as one JSON object per line
pub struct JsonLinesSource<R> {
    reader: R,
    line: String,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl JsonLinesSource<BufReader<File>> {
    /// Open a file or FIFO written by an external detector
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead + Send> DetectionSource for JsonLinesSource<R> {
    fn next_detection(&mut self) -> Result<Option<Detection>, AdapterError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str(line) {
                Ok(detection) => return Ok(Some(detection)),
                Err(e) => warn!(%line, error = %e, "skipping malformed detection"),
            }
        }
    }
}

/// What the worker thread reads detections from
enum Feed {
    /// Opened on the worker thread; a FIFO blocks until a writer appears
    Path(PathBuf),
    Ready(Box<dyn DetectionSource>),
}

impl Feed {
    fn open(self) -> Result<Box<dyn DetectionSource>, AdapterError> {
        match self {
            Feed::Ready(source) => Ok(source),
            Feed::Path(path) => JsonLinesSource::open(&path)
                .map(|s| Box::new(s) as Box<dyn DetectionSource>)
                .map_err(|e| AdapterError::Unavailable {
                    adapter: ADAPTER,
                    reason: format!("cannot open {}: {}", path.display(), e),
                }),
        }
    }
}

/// Capture-session control handed to modes
#[derive(Clone)]
pub struct VisionHandle {
    capturing: Arc<AtomicBool>,
}

impl VisionControl for VisionHandle {
    fn begin_session(&self, purpose: &str) {
        if !self.capturing.swap(true, Ordering::SeqCst) {
            info!(purpose, "vision capture session started");
        }
    }

    fn end_session(&self) {
        if self.capturing.swap(false, Ordering::SeqCst) {
            info!("vision capture session ended");
        }
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

/// Worker forwarding detections onto the bus
pub struct VisionWorker {
    config: VisionConfig,
    bus: MessageBus,
    running: Arc<AtomicBool>,
    capturing: Arc<AtomicBool>,
    source: Option<Box<dyn DetectionSource>>,
}

impl VisionWorker {
    pub fn new(config: VisionConfig, bus: MessageBus) -> Self {
        Self {
            config,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            capturing: Arc::new(AtomicBool::new(false)),
            source: None,
        }
    }

    /// Use `source` instead of opening the configured path
    #[cfg(test)]
    pub fn with_source(mut self, source: Box<dyn DetectionSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn handle(&self) -> VisionHandle {
        VisionHandle {
            capturing: Arc::clone(&self.capturing),
        }
    }

    fn unavailable(&self, reason: String) -> AdapterError {
        self.bus
            .publish(topics::VISION_ERROR, json!({ "reason": reason }));
        AdapterError::Unavailable {
            adapter: ADAPTER,
            reason,
        }
    }

    /// Resolve the feed without opening it
    fn feed(&mut self) -> Result<Feed, AdapterError> {
        if let Some(source) = self.source.take() {
            return Ok(Feed::Ready(source));
        }

        let path = self
            .config
            .source
            .clone()
            .ok_or_else(|| self.unavailable("no detection source configured".to_string()))?;
        if !path.exists() {
            return Err(self.unavailable(format!("{} does not exist", path.display())));
        }
        Ok(Feed::Path(path))
    }
}

impl WorkerAdapter for VisionWorker {
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
        if self.running.load(Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning(ADAPTER));
        }

        let feed = self.feed()?;
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let capturing = Arc::clone(&self.capturing);
        let bus = self.bus.clone();

        thread::Builder::new()
            .name("vision-worker".to_string())
            .spawn(move || {
                let mut source = match feed.open() {
                    Ok(source) => source,
                    Err(e) => {
                        error!(error = %e, "vision source unavailable");
                        bus.publish(topics::VISION_ERROR, json!({ "reason": e.to_string() }));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };
                info!("vision worker thread started");

                while running.load(Ordering::SeqCst) {
                    match source.next_detection() {
                        Ok(Some(detection)) if capturing.load(Ordering::SeqCst) => {
                            bus.publish_event(detection.into_event());
                        }
                        Ok(Some(detection)) => {
                            trace!(?detection, "no capture session, dropping detection");
                        }
                        Ok(None) => {
                            bus.publish(
                                topics::VISION_ERROR,
                                json!({ "reason": "detection source closed" }),
                            );
                            break;
                        }
                        Err(e) => {
                            bus.publish(topics::VISION_ERROR, json!({ "reason": e.to_string() }));
                            break;
                        }
                    }
                }

                running.store(false, Ordering::SeqCst);
                debug!("vision worker thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AdapterError::ThreadSpawn {
                    adapter: ADAPTER,
                    reason: e.to_string(),
                }
            })?;

        Ok(())
    }

    fn stop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
