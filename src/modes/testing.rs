//! Capability fakes shared by the mode tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapters::{AdapterError, Capabilities, SerialLink, Speaker, VisionControl};
use crate::controller::ModeContext;
use crate::events::MessageBus;

#[derive(Default)]
pub struct FakeVision {
    pub capturing: AtomicBool,
    pub purposes: Mutex<Vec<String>>,
}

impl VisionControl for FakeVision {
    fn begin_session(&self, purpose: &str) {
        self.capturing.store(true, Ordering::SeqCst);
        self.purposes.lock().push(purpose.to_string());
    }

    fn end_session(&self) {
        self.capturing.store(false, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingSerial {
    pub frames: Mutex<Vec<String>>,
}

impl RecordingSerial {
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }
}

impl SerialLink for RecordingSerial {
    fn send(&self, bytes: &[u8]) -> Result<(), AdapterError> {
        self.frames
            .lock()
            .push(String::from_utf8_lossy(bytes).trim_end().to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSpeaker {
    pub said: Mutex<Vec<String>>,
    pub hushes: Mutex<usize>,
}

impl RecordingSpeaker {
    pub fn said(&self) -> Vec<String> {
        self.said.lock().clone()
    }
}

impl Speaker for RecordingSpeaker {
    fn say(&self, text: &str) -> Result<(), AdapterError> {
        self.said.lock().push(text.to_string());
        Ok(())
    }

    fn hush(&self) {
        *self.hushes.lock() += 1;
    }
}

pub struct Fakes {
    pub vision: Arc<FakeVision>,
    pub serial: Arc<RecordingSerial>,
    pub speaker: Arc<RecordingSpeaker>,
    pub bus: MessageBus,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            vision: Arc::default(),
            serial: Arc::default(),
            speaker: Arc::default(),
            bus: MessageBus::new(),
        }
    }

    pub fn caps(&self) -> Capabilities {
        Capabilities {
            vision: Some(self.vision.clone()),
            serial: Some(self.serial.clone()),
            speaker: Some(self.speaker.clone()),
        }
    }

    pub fn context(&self) -> ModeContext {
        ModeContext::new(self.caps(), self.bus.clone())
    }
}
