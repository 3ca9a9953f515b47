//! lamp-daemon: mode orchestration daemon for an interactive desk lamp
//!
//! The daemon runs on the lamp itself and provides:
//! - Hardware workers (camera detections, serial head link, speaker,
//!   reminder scheduler) publishing onto a message bus
//! - A state machine and mode controller keeping exactly one mode active
//! - A permission-gated command router shared by UI, voice and remote
//!   front-ends
//! - IPC server for front-end communication
//!
//! Rendering, recognition algorithms and audio synthesis live outside
//! this process.

mod adapters;
mod command;
mod config;
mod controller;
mod events;
mod ipc;
mod lifecycle;
mod modes;
mod runtime;
mod services;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::{
    Capabilities, ReminderScheduler, SerialWorker, SpeakerWorker, VisionWorker, WorkerAdapter,
};
use crate::command::ControlPolicy;
use crate::config::Config;
use crate::controller::ModeController;
use crate::events::{topics, MessageBus};
use crate::ipc::Server;
use crate::lifecycle::{os_signal, ShutdownSignal};
use crate::modes::default_registry;
use crate::runtime::{load_control_mode, watch_control_mode, Coordinator, Core};
use crate::services::{JsonStore, Services, Settings};

/// How long shutdown waits for pending record writes
const STORE_SYNC_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "lamp-daemon starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    let socket_path = config.socket_path();
    info!(?socket_path, data_dir = ?config.data_dir, "configuration loaded");

    let shutdown = ShutdownSignal::new();
    let bus = MessageBus::new();
    let store = JsonStore::open(&config.data_dir)?;
    let services = Services::load(&store, Settings::seeded(&config.modes));

    // Start workers; anything that fails to start is simply not offered
    // as a capability
    let mut serial = SerialWorker::new(config.serial.clone(), bus.clone());
    let mut vision = VisionWorker::new(config.vision.clone(), bus.clone());
    let mut speaker = SpeakerWorker::new(config.speaker.clone(), bus.clone());
    let mut scheduler = ReminderScheduler::new(
        services.reminders.clone(),
        bus.clone(),
        config.schedule_interval(),
    );

    let mut caps = Capabilities::default();
    if start_worker(&mut serial) {
        caps.serial = Some(Arc::new(serial.sender()));
    }
    if start_worker(&mut vision) {
        caps.vision = Some(Arc::new(vision.handle()));
    }
    if start_worker(&mut speaker) {
        caps.speaker = Some(Arc::new(speaker.handle()));
    }
    // Subscribe before the scheduler fires anything already overdue
    let (_, reminders_due) = bus.subscribe_channel(topics::REMINDER_DUE);
    start_worker(&mut scheduler);

    let registry = default_registry(&config.modes, &caps, &services.settings);
    let (modes, deliveries) = ModeController::new(registry, caps, bus.clone())?;

    let control_mode = if config.control.persist {
        load_control_mode(&store, config.control.default_mode)
    } else {
        config.control.default_mode
    };
    let policy = Arc::new(ControlPolicy::new(control_mode));
    watch_control_mode(&policy, bus.clone(), config.control.persist.then(|| store.clone()));
    info!(%control_mode, "control policy ready");

    let core = Core::new(modes, services, policy, bus.clone(), shutdown.clone());
    let (coordinator, handle) =
        Coordinator::new(core, deliveries, reminders_due, config.update_interval());
    let coordinator_task = tokio::spawn(coordinator.run());

    // Create IPC server fed by the coordinator and bus notifications
    let server = Server::new(&socket_path, handle, &bus)?;

    let signals = shutdown.clone();
    tokio::spawn(async move {
        match os_signal().await {
            Ok(name) => signals.trigger(name),
            Err(e) => error!(error = %e, "signal handling unavailable"),
        }
    });

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
            shutdown.trigger("ipc server exited");
        }

        // Wait for a signal or the shutdown command
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    if let Err(e) = coordinator_task.await {
        error!(?e, "coordinator task failed");
    }
    server.shutdown().await;

    scheduler.stop();
    speaker.stop();
    vision.stop();
    serial.stop();

    if !store.sync(STORE_SYNC_TIMEOUT) {
        warn!("timed out waiting for pending records");
    }

    info!("lamp-daemon stopped");

    Ok(())
}

fn start_worker(worker: &mut dyn WorkerAdapter) -> bool {
    match worker.start() {
        Ok(()) => {
            info!(worker = worker.name(), "worker started");
            true
        }
        Err(e) => {
            warn!(worker = worker.name(), error = %e, "worker unavailable, continuing without it");
            false
        }
    }
}
