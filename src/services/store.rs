//! JSON record store
//!
//! Records are whole JSON documents keyed by name (`lighting`, `pet`, ...).
//! Saves are handed to a background writer thread and never wait for the
//! disk; `sync` is a barrier used at shutdown and in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

enum StoreOp {
    Save { name: String, value: Value },
    Sync(Sender<()>),
}

#[derive(Clone)]
enum Backend {
    Disk { dir: PathBuf, tx: Sender<StoreOp> },
    Memory(Arc<Mutex<HashMap<String, Value>>>),
}

/// Fire-and-forget persistence for service records
#[derive(Clone)]
pub struct JsonStore {
    backend: Backend,
}

impl JsonStore {
    /// Store records as `<dir>/<name>.json`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let (tx, rx) = mpsc::channel::<StoreOp>();
        let root = dir.to_path_buf();

        thread::Builder::new()
            .name("store-writer".to_string())
            .spawn(move || {
                for op in rx {
                    match op {
                        StoreOp::Save { name, value } => {
                            if let Err(e) = write_record(&root, &name, &value) {
                                warn!(record = %name, error = %e, "failed to persist record");
                            }
                        }
                        StoreOp::Sync(reply) => {
                            let _ = reply.send(());
                        }
                    }
                }
                debug!("store writer stopped");
            })
            .context("failed to spawn store writer")?;

        Ok(Self {
            backend: Backend::Disk {
                dir: dir.to_path_buf(),
                tx,
            },
        })
    }

    /// Store that keeps records in memory only
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Read a record; missing or unreadable records yield `None`
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = match &self.backend {
            Backend::Disk { dir, .. } => {
                let path = record_path(dir, name);
                let text = std::fs::read_to_string(&path).ok()?;
                match serde_json::from_str::<Value>(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "ignoring corrupt record");
                        return None;
                    }
                }
            }
            Backend::Memory(records) => records.lock().get(name)?.clone(),
        };

        serde_json::from_value(value)
            .map_err(|e| warn!(record = name, error = %e, "record has unexpected shape"))
            .ok()
    }

    /// Queue a record for writing
    pub fn save<T: Serialize>(&self, name: &str, record: &T) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                warn!(record = name, error = %e, "record is not serializable");
                return;
            }
        };

        match &self.backend {
            Backend::Disk { tx, .. } => {
                let op = StoreOp::Save {
                    name: name.to_string(),
                    value,
                };
                if tx.send(op).is_err() {
                    warn!(record = name, "store writer is gone, record dropped");
                }
            }
            Backend::Memory(records) => {
                records.lock().insert(name.to_string(), value);
            }
        }
    }

    /// Wait until every save queued so far has been written
    pub fn sync(&self, timeout: Duration) -> bool {
        match &self.backend {
            Backend::Disk { tx, .. } => {
                let (reply_tx, reply_rx) = mpsc::channel();
                if tx.send(StoreOp::Sync(reply_tx)).is_err() {
                    return false;
                }
                reply_rx.recv_timeout(timeout).is_ok()
            }
            Backend::Memory(_) => true,
        }
    }
}

fn record_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.json", name))
}

fn write_record(dir: &Path, name: &str, value: &Value) -> Result<()> {
    let path = record_path(dir, name);
    let tmp = dir.join(format!(".{}.json.tmp", name));
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, &path)?;
    debug!(path = %path.display(), "record written");
    Ok(())
}
