//! The coordinator task
//!
//! A single task owns the [`Core`] and the router. Commands from every
//! front-end, mode deliveries, scheduler events and the update tick all
//! funnel through one `select!` loop, so transitions and commands run to
//! completion one at a time in arrival order.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::command::{
    Command, CommandResult, CommandRouter, CommandSource, ControlMode, ControlPolicy, ErrorCode,
    HistoryEntry,
};
use crate::controller::Delivery;
use crate::events::{topics, Event};

use super::{register_builtin, Core};

const INBOX_CAPACITY: usize = 64;

/// Requests accepted by the coordinator
#[derive(Debug)]
pub enum CoordinatorRequest {
    Execute {
        command: Command,
        reply: oneshot::Sender<CommandResult>,
    },
    Voice {
        text: String,
        reply: oneshot::Sender<CommandResult>,
    },
    Status {
        reply: oneshot::Sender<Value>,
    },
    History {
        limit: usize,
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
}

/// Cloneable front door to the coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorRequest>,
    policy: Arc<ControlPolicy>,
}

impl CoordinatorHandle {
    pub async fn execute(
        &self,
        name: &str,
        args: Map<String, Value>,
        source: CommandSource,
    ) -> CommandResult {
        let command = Command::new(name, args, source);
        let (reply, rx) = oneshot::channel();
        self.request(CoordinatorRequest::Execute { command, reply }, rx)
            .await
            .unwrap_or_else(stopped)
    }

    pub async fn voice(&self, text: &str) -> CommandResult {
        let (reply, rx) = oneshot::channel();
        let request = CoordinatorRequest::Voice {
            text: text.to_string(),
            reply,
        };
        self.request(request, rx).await.unwrap_or_else(stopped)
    }

    pub async fn status(&self) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.request(CoordinatorRequest::Status { reply }, rx).await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let (reply, rx) = oneshot::channel();
        self.request(CoordinatorRequest::History { limit, reply }, rx)
            .await
    }

    /// The policy is process-wide; reading it never waits on the coordinator
    pub fn control_mode(&self) -> ControlMode {
        self.policy.get()
    }

    /// Swap the control mode, returning the previous one
    pub fn set_control_mode(&self, mode: ControlMode) -> ControlMode {
        self.policy.set(mode)
    }

    async fn request<T>(
        &self,
        request: CoordinatorRequest,
        rx: oneshot::Receiver<T>,
    ) -> Result<T> {
        self.tx
            .send(request)
            .await
            .map_err(|_| anyhow!("coordinator is not running"))?;
        rx.await.map_err(|_| anyhow!("coordinator dropped the request"))
    }
}

fn stopped(e: anyhow::Error) -> CommandResult {
    CommandResult::failure(ErrorCode::ExecutionError, e.to_string())
}

pub struct Coordinator {
    core: Core,
    router: CommandRouter<Core>,
    requests: mpsc::Receiver<CoordinatorRequest>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    reminders: mpsc::UnboundedReceiver<Event>,
    finished_blocks: mpsc::UnboundedReceiver<Event>,
    update_interval: Duration,
}

impl Coordinator {
    /// `reminders` must be subscribed to `schedule:reminder_due` before the
    /// scheduler starts, or reminders already overdue at start-up are lost
    pub fn new(
        core: Core,
        deliveries: mpsc::UnboundedReceiver<Delivery>,
        reminders: mpsc::UnboundedReceiver<Event>,
        update_interval: Duration,
    ) -> (Self, CoordinatorHandle) {
        let mut router = CommandRouter::new(Arc::clone(&core.policy));
        register_builtin(&mut router);

        let bus = core.bus().clone();
        router.add_listener(move |command, result| {
            bus.publish(
                topics::COMMAND_EXECUTED,
                json!({
                    "name": command.name,
                    "source": command.source.as_str(),
                    "success": result.success,
                    "error": result.error.map(ErrorCode::as_str),
                }),
            );
        });

        let (_, finished_blocks) = core.bus().subscribe_channel(topics::STUDY_FINISHED);

        let (tx, requests) = mpsc::channel(INBOX_CAPACITY);
        let handle = CoordinatorHandle {
            tx,
            policy: Arc::clone(&core.policy),
        };

        let coordinator = Self {
            core,
            router,
            requests,
            deliveries,
            reminders,
            finished_blocks,
            update_interval,
        };
        (coordinator, handle)
    }

    /// Serve until shutdown is requested, then exit the active mode
    pub async fn run(mut self) {
        let shutdown = self.core.shutdown.clone();
        let mut ticker = tokio::time::interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            mode = %self.core.current_mode(),
            commands = self.router.commands().len(),
            "coordinator started"
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                Some(request) = self.requests.recv() => self.handle_request(request),
                Some(delivery) = self.deliveries.recv() => self.core.deliver(delivery),
                Some(event) = self.reminders.recv() => self.reminder_due(&event),
                Some(event) = self.finished_blocks.recv() => self.block_finished(&event),
                _ = ticker.tick() => self.core.tick(),
            }
        }

        self.core.shutdown();
        info!("coordinator stopped");
    }

    fn handle_request(&mut self, request: CoordinatorRequest) {
        match request {
            CoordinatorRequest::Execute { command, reply } => {
                let result = self.router.execute(&mut self.core, command);
                let _ = reply.send(result);
            }
            CoordinatorRequest::Voice { text, reply } => {
                let result = self.router.execute_voice(&mut self.core, &text);
                let _ = reply.send(result);
            }
            CoordinatorRequest::Status { reply } => {
                let _ = reply.send(self.core.status());
            }
            CoordinatorRequest::History { limit, reply } => {
                let _ = reply.send(self.router.history(limit));
            }
        }
    }

    /// Reminders carrying a command run it under the source that created
    /// the reminder, so the current policy still applies; the rest are spoken
    fn reminder_due(&mut self, event: &Event) {
        let id = event.get_str("id").unwrap_or_default();
        let content = event.get_str("content").unwrap_or_default();

        match event.get_str("command") {
            Some(name) => {
                let args = event
                    .payload
                    .get("args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let source = event
                    .payload
                    .get("source")
                    .cloned()
                    .and_then(|source| serde_json::from_value(source).ok())
                    .unwrap_or(CommandSource::Timer);
                let result = self.router.dispatch(&mut self.core, name, args, source);
                if !result.success {
                    warn!(reminder = id, command = name, %source, message = %result.message, "reminder command failed");
                }
            }
            None => {
                info!(reminder = id, "announcing reminder");
                self.core.say(&format!("Reminder: {}", content));
            }
        }
    }

    fn block_finished(&mut self, event: &Event) {
        match self.core.services.study.add_pomodoro() {
            Ok(count) => info!(pomodoros = count, "pomodoro completed"),
            Err(e) => debug!(%event, reason = %e, "work block finished outside a session"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::VisionControl;
    use crate::config::ModesConfig;
    use crate::controller::ModeController;
    use crate::lifecycle::ShutdownSignal;
    use crate::modes::default_registry;
    use crate::modes::testing::Fakes;
    use crate::adapters::{ReminderScheduler, WorkerAdapter};
    use crate::services::{JsonStore, NewReminder, Services, Settings};
    use chrono::Local;
    use serde_json::json;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    pub(crate) fn spawn_coordinator(fakes: &Fakes, mode: ControlMode) -> (CoordinatorHandle, JoinHandle<()>) {
        let (_, reminders) = fakes.bus.subscribe_channel(topics::REMINDER_DUE);
        spawn_with(fakes, mode, Services::in_memory(), reminders)
    }

    fn spawn_with(
        fakes: &Fakes,
        mode: ControlMode,
        services: Services,
        reminders: mpsc::UnboundedReceiver<Event>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let config = ModesConfig::default();
        let registry = default_registry(&config, &fakes.caps(), &services.settings);
        let (modes, deliveries) =
            ModeController::new(registry, fakes.caps(), fakes.bus.clone()).unwrap();
        let core = Core::new(
            modes,
            services,
            Arc::new(ControlPolicy::new(mode)),
            fakes.bus.clone(),
            ShutdownSignal::new(),
        );
        let (coordinator, handle) =
            Coordinator::new(core, deliveries, reminders, Duration::from_millis(10));
        (handle, tokio::spawn(coordinator.run()))
    }

    async fn wait_for_history(handle: &CoordinatorHandle, name: &str) -> HistoryEntry {
        timeout(WAIT, async {
            loop {
                if let Some(entry) = handle.history(1).await.unwrap().pop() {
                    if entry.command.name == name {
                        return entry;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_standby_to_pet_scenario() {
        let fakes = Fakes::new();
        let (_, mut actions) = fakes.bus.subscribe_channel(topics::PET_ACTION);
        let (_, mut changes) = fakes.bus.subscribe_channel(topics::MODE_CHANGED);
        let (handle, _task) = spawn_coordinator(&fakes, ControlMode::All);

        let result = handle
            .execute("switch_mode", args(json!({ "mode": "pet" })), CommandSource::Ui)
            .await;
        assert!(result.success, "{}", result.message);

        let change = timeout(WAIT, changes.recv()).await.unwrap().unwrap();
        assert_eq!(change.get_str("from"), Some("standby"));
        assert_eq!(change.get_str("to"), Some("pet"));

        let greeting = timeout(WAIT, actions.recv()).await.unwrap().unwrap();
        assert_eq!(greeting.get_str("trigger"), Some("enter"));

        fakes.bus.publish(topics::VISION_GESTURE, json!({ "name": "peace" }));
        let reaction = timeout(WAIT, actions.recv()).await.unwrap().unwrap();
        assert_eq!(reaction.get_str("action"), Some("dance"));
        assert_eq!(reaction.get_str("trigger"), Some("gesture"));

        let status = handle.status().await.unwrap();
        assert_eq!(status["mode"], json!("pet"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_one_active_mode() {
        let fakes = Fakes::new();
        let (_, mut changes) = fakes.bus.subscribe_channel(topics::MODE_CHANGED);
        let (handle, _task) = spawn_coordinator(&fakes, ControlMode::All);

        let targets = ["pet", "study", "hand_follow", "standby"];
        let requests: Vec<_> = (0..32)
            .map(|i| {
                let handle = handle.clone();
                let mode = targets[i % targets.len()];
                tokio::spawn(async move {
                    handle
                        .execute("switch_mode", args(json!({ "mode": mode })), CommandSource::Remote)
                        .await
                })
            })
            .collect();
        for request in requests {
            assert!(request.await.unwrap().success);
        }

        let status = handle.status().await.unwrap();
        assert_eq!(status["mode"], status["active_instance"]);

        // Every transition starts where the previous one ended
        let mut current = "standby".to_string();
        while let Ok(change) = changes.try_recv() {
            assert_eq!(change.get_str("from"), Some(current.as_str()));
            current = change.get_str("to").unwrap_or_default().to_string();
        }
        assert_eq!(status["mode"], json!(current));
    }

    #[tokio::test]
    async fn test_voice_respects_control_mode() {
        let fakes = Fakes::new();
        let (_, mut executed) = fakes.bus.subscribe_channel(topics::COMMAND_EXECUTED);
        let (handle, _task) = spawn_coordinator(&fakes, ControlMode::UiOnly);

        let denied = handle.voice("lights on").await;
        assert_eq!(denied.error, Some(ErrorCode::SourceNotAllowed));

        let event = timeout(WAIT, executed.recv()).await.unwrap().unwrap();
        assert_eq!(event.get_str("name"), Some("turn_on"));
        assert_eq!(event.get_str("source"), Some("voice"));
        assert_eq!(event.get_str("error"), Some("SOURCE_NOT_ALLOWED"));

        assert_eq!(handle.set_control_mode(ControlMode::UiVoice), ControlMode::UiOnly);
        assert!(handle.voice("lights on").await.success);

        let unknown = handle.voice("sing me a song").await;
        assert_eq!(unknown.error, Some(ErrorCode::UnknownCommand));

        let history = handle.history(10).await.unwrap();
        let names: Vec<_> = history.iter().map(|h| h.command.name.as_str()).collect();
        assert_eq!(names, vec!["turn_on", "turn_on"]);
    }

    #[tokio::test]
    async fn test_reminder_command_runs_as_timer() {
        let fakes = Fakes::new();
        let (handle, _task) = spawn_coordinator(&fakes, ControlMode::UiOnly);

        fakes.bus.publish(
            topics::REMINDER_DUE,
            json!({ "id": "r-1", "content": "lights", "command": "turn_on" }),
        );
        fakes.bus.publish(topics::REMINDER_DUE, json!({ "id": "r-2", "content": "stretch" }));

        let entry = wait_for_history(&handle, "turn_on").await;
        assert_eq!(entry.command.name, "turn_on");
        assert_eq!(entry.command.source, CommandSource::Timer);
        assert!(entry.result.success);

        timeout(WAIT, async {
            while !fakes.speaker.said().contains(&"Reminder: stretch".to_string()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_reminder_command_follows_creating_source_policy() {
        let fakes = Fakes::new();
        let (handle, _task) = spawn_coordinator(&fakes, ControlMode::All);

        let added = handle
            .execute(
                "add_reminder",
                args(json!({ "content": "lights", "minutes": 1, "command": "turn_on" })),
                CommandSource::Ui,
            )
            .await;
        assert!(added.success);
        handle.set_control_mode(ControlMode::VoiceOnly);

        fakes.bus.publish(
            topics::REMINDER_DUE,
            json!({ "id": "r-1", "content": "lights", "command": "turn_on", "source": "ui" }),
        );

        let entry = wait_for_history(&handle, "turn_on").await;
        assert_eq!(entry.command.name, "turn_on");
        assert_eq!(entry.command.source, CommandSource::Ui);
        assert_eq!(entry.result.error, Some(ErrorCode::SourceNotAllowed));

        let status = handle.status().await.unwrap();
        assert_eq!(status["light"]["on"], json!(false));
    }

    #[tokio::test]
    async fn test_overdue_reminder_reaches_coordinator_started_after_scheduler() {
        let fakes = Fakes::new();
        let services = Services::load(&JsonStore::in_memory(), Settings::default());
        services
            .reminders
            .add(NewReminder::at("take pills", Local::now() - chrono::Duration::minutes(5)));

        let (_, reminders) = fakes.bus.subscribe_channel(topics::REMINDER_DUE);
        let mut scheduler = ReminderScheduler::new(
            services.reminders.clone(),
            fakes.bus.clone(),
            Duration::from_millis(20),
        );
        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(services.reminders.pending(), 0);

        let (_handle, _task) = spawn_with(&fakes, ControlMode::All, services, reminders);
        timeout(WAIT, async {
            while !fakes.speaker.said().contains(&"Reminder: take pills".to_string()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        scheduler.stop();
    }

    #[tokio::test]
    async fn test_shutdown_command_stops_coordinator() {
        let fakes = Fakes::new();
        let (handle, task) = spawn_coordinator(&fakes, ControlMode::All);

        assert!(handle
            .execute("enter_hand_follow", Map::new(), CommandSource::Ui)
            .await
            .success);
        assert!(handle.execute("shutdown", Map::new(), CommandSource::Ui).await.success);

        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(!fakes.vision.is_capturing());

        let late = handle.execute("turn_on", Map::new(), CommandSource::Ui).await;
        assert_eq!(late.error, Some(ErrorCode::ExecutionError));
    }
}
