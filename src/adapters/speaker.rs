//! Speaker worker
//!
//! Utterances are queued on a bounded channel and spoken one at a time on
//! the worker thread. `hush` bumps an epoch counter so that everything
//! queued before it is skipped instead of spoken.

use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SpeakerConfig;
use crate::events::{topics, MessageBus};

use super::{AdapterError, Speaker, WorkerAdapter};

const ADAPTER: &str = "speaker";
const POLL: Duration = Duration::from_millis(100);

type Utterance = (u64, String);

/// Turns text into sound; may block while speaking
pub trait SpeechEngine: Send {
    fn speak(&mut self, text: &str) -> Result<(), AdapterError>;
}

/// Engine that only logs, used when no TTS program is configured
pub struct LogEngine;

impl SpeechEngine for LogEngine {
    fn speak(&mut self, text: &str) -> Result<(), AdapterError> {
        info!(text, "speak");
        Ok(())
    }
}

/// Engine that runs an external program with the text as last argument
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    /// Split a command line such as `espeak -v en` on whitespace
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl SpeechEngine for CommandEngine {
    fn speak(&mut self, text: &str) -> Result<(), AdapterError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(AdapterError::Unavailable {
                adapter: ADAPTER,
                reason: format!("{} exited with {}", self.program, status),
            })
        }
    }
}

/// Non-blocking handle given to modes
#[derive(Clone)]
pub struct SpeakerHandle {
    tx: SyncSender<Utterance>,
    epoch: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Speaker for SpeakerHandle {
    fn say(&self, text: &str) -> Result<(), AdapterError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(AdapterError::NotRunning(ADAPTER));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        self.tx
            .try_send((epoch, text.to_string()))
            .map_err(|e| match e {
                TrySendError::Full(_) => AdapterError::QueueFull(ADAPTER),
                TrySendError::Disconnected(_) => AdapterError::NotRunning(ADAPTER),
            })
    }

    fn hush(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, "speaker queue hushed");
    }
}

/// Worker owning the speech engine
pub struct SpeakerWorker {
    config: SpeakerConfig,
    bus: MessageBus,
    running: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    tx: SyncSender<Utterance>,
    rx: Arc<Mutex<Receiver<Utterance>>>,
    engine: Option<Box<dyn SpeechEngine>>,
}

impl SpeakerWorker {
    pub fn new(config: SpeakerConfig, bus: MessageBus) -> Self {
        let (tx, rx) = mpsc::sync_channel(config.queue_size.max(1));

        Self {
            config,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            engine: None,
        }
    }

    /// Use `engine` instead of the configured program
    #[cfg(test)]
    pub fn with_engine(mut self, engine: Box<dyn SpeechEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn handle(&self) -> SpeakerHandle {
        SpeakerHandle {
            tx: self.tx.clone(),
            epoch: Arc::clone(&self.epoch),
            running: Arc::clone(&self.running),
        }
    }

    fn build_engine(&mut self) -> Box<dyn SpeechEngine> {
        if let Some(engine) = self.engine.take() {
            return engine;
        }

        match self
            .config
            .command
            .as_deref()
            .and_then(CommandEngine::from_command_line)
        {
            Some(engine) => {
                info!(program = %engine.program, "using external speech program");
                Box::new(engine)
            }
            None => Box::new(LogEngine),
        }
    }
}

impl WorkerAdapter for SpeakerWorker {
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
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning(ADAPTER));
        }

        let mut engine = self.build_engine();
        let running = Arc::clone(&self.running);
        let epoch = Arc::clone(&self.epoch);
        let queue = Arc::clone(&self.rx);
        let bus = self.bus.clone();

        thread::Builder::new()
            .name("speaker-worker".to_string())
            .spawn(move || {
                let queue = queue.lock();

                while running.load(Ordering::SeqCst) {
                    let (tag, text) = match queue.recv_timeout(POLL) {
                        Ok(item) => item,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };

                    if tag < epoch.load(Ordering::SeqCst) {
                        debug!(%text, "skipping hushed utterance");
                        continue;
                    }

                    match engine.speak(&text) {
                        Ok(()) => {
                            bus.publish(topics::SPEAKER_FINISHED, json!({ "text": text }));
                        }
                        Err(e) => {
                            warn!(error = %e, "speech failed");
                            bus.publish(
                                topics::SPEAKER_ERROR,
                                json!({ "text": text, "reason": e.to_string() }),
                            );
                        }
                    }
                }
                debug!("speaker worker stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                AdapterError::ThreadSpawn {
                    adapter: ADAPTER,
                    reason: e.to_string(),
                }
            })?;

        info!("speaker worker started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("speaker worker stopping");
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use std::time::Instant;

    /// Reports each utterance on `started`, then waits on `gate`
    struct GatedEngine {
        spoken: Arc<Mutex<Vec<String>>>,
        started: mpsc::Sender<()>,
        gate: Receiver<()>,
    }

    impl SpeechEngine for GatedEngine {
        fn speak(&mut self, text: &str) -> Result<(), AdapterError> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            self.spoken.lock().push(text.to_string());
            Ok(())
        }
    }

    struct BrokenEngine;

    impl SpeechEngine for BrokenEngine {
        fn speak(&mut self, _text: &str) -> Result<(), AdapterError> {
            Err(AdapterError::Unavailable {
                adapter: ADAPTER,
                reason: "no audio device".to_string(),
            })
        }
    }

    fn config() -> SpeakerConfig {
        SpeakerConfig {
            queue_size: 8,
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
    fn test_command_line_parsing() {
        let engine = CommandEngine::from_command_line("espeak -v en").unwrap();
        assert_eq!(engine.program, "espeak");
        assert_eq!(engine.args, vec!["-v".to_string(), "en".to_string()]);
        assert!(CommandEngine::from_command_line("   ").is_none());
    }

    #[test]
    fn test_say_before_start_fails() {
        let worker = SpeakerWorker::new(config(), MessageBus::new());
        assert!(matches!(
            worker.handle().say("hello"),
            Err(AdapterError::NotRunning("speaker"))
        ));
    }

    #[test]
    fn test_hush_drops_queued_utterances() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let engine = GatedEngine {
            spoken: Arc::clone(&spoken),
            started: started_tx,
            gate: gate_rx,
        };

        let mut worker = SpeakerWorker::new(config(), MessageBus::new()).with_engine(Box::new(engine));
        let speaker = worker.handle();
        worker.start().unwrap();

        speaker.say("one").unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        speaker.say("two").unwrap();
        speaker.say("three").unwrap();
        speaker.hush();
        speaker.say("four").unwrap();
        drop(gate_tx);

        assert!(wait_until(|| spoken.lock().len() == 2));
        assert_eq!(*spoken.lock(), vec!["one".to_string(), "four".to_string()]);

        worker.stop();
    }

    #[test]
    fn test_engine_failure_is_published() {
        let bus = MessageBus::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        bus.subscribe(topics::SPEAKER_ERROR, move |e: &Event| {
            sink.lock().push(e.clone());
            Ok(())
        });

        let mut worker = SpeakerWorker::new(config(), bus).with_engine(Box::new(BrokenEngine));
        worker.start().unwrap();
        worker.handle().say("hi").unwrap();

        assert!(wait_until(|| !errors.lock().is_empty()));
        assert_eq!(errors.lock()[0].get_str("text"), Some("hi"));

        worker.stop();
    }
}
