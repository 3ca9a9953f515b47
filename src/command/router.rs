//! Permission-gated command router
//!
//! The router is generic over the context its handlers mutate, so it can
//! be exercised without the rest of the daemon. Every dispatch yields a
//! [`CommandResult`]; nothing a handler does escapes as an error or panic.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::events::panic_message;

use super::params::{validate, ParamSpec};
use super::voice::parse_utterance;
use super::{
    Command, CommandOutcome, CommandResult, CommandSource, ControlPolicy, ErrorCode, HistoryEntry,
};

/// Commands kept in the history ring
pub const HISTORY_LIMIT: usize = 100;

pub type CommandHandler<C> =
    Box<dyn Fn(&mut C, &Command) -> anyhow::Result<CommandOutcome> + Send + Sync>;

pub type CommandListener = Box<dyn Fn(&Command, &CommandResult) + Send + Sync>;

struct Registration<C> {
    description: &'static str,
    params: &'static [ParamSpec],
    handler: CommandHandler<C>,
}

/// Name and description of a registered command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: &'static str,
}

pub struct CommandRouter<C> {
    commands: BTreeMap<String, Registration<C>>,
    policy: Arc<ControlPolicy>,
    listeners: Vec<CommandListener>,
    history: VecDeque<HistoryEntry>,
}

impl<C> CommandRouter<C> {
    pub fn new(policy: Arc<ControlPolicy>) -> Self {
        Self {
            commands: BTreeMap::new(),
            policy,
            listeners: Vec::new(),
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    pub fn policy(&self) -> &Arc<ControlPolicy> {
        &self.policy
    }

    /// Register `handler` under `name`, replacing any earlier registration
    pub fn register<F>(
        &mut self,
        name: &str,
        description: &'static str,
        params: &'static [ParamSpec],
        handler: F,
    ) where
        F: Fn(&mut C, &Command) -> anyhow::Result<CommandOutcome> + Send + Sync + 'static,
    {
        let registration = Registration {
            description,
            params,
            handler: Box::new(handler),
        };
        if self.commands.insert(name.to_string(), registration).is_some() {
            warn!(command = name, "command handler replaced");
        }
    }

    /// Registered commands in name order
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.commands
            .iter()
            .map(|(name, reg)| CommandInfo {
                name: name.clone(),
                description: reg.description,
            })
            .collect()
    }

    /// Observe every dispatch, accepted or rejected
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&Command, &CommandResult) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Build and dispatch a command
    pub fn dispatch(
        &mut self,
        ctx: &mut C,
        name: &str,
        args: Map<String, Value>,
        source: CommandSource,
    ) -> CommandResult {
        self.execute(ctx, Command::new(name, args, source))
    }

    /// Dispatch a transcribed utterance with source `voice`
    pub fn execute_voice(&mut self, ctx: &mut C, text: &str) -> CommandResult {
        match parse_utterance(text) {
            Some(intent) => self.dispatch(ctx, intent.command, intent.args, CommandSource::Voice),
            None => {
                debug!(text, "utterance not recognized");
                CommandResult::failure(
                    ErrorCode::UnknownCommand,
                    format!("no command matches '{}'", text.trim()),
                )
            }
        }
    }

    /// Validate, authorize and run one command
    pub fn execute(&mut self, ctx: &mut C, command: Command) -> CommandResult {
        let result = self.run(ctx, &command);

        match &result.error {
            None => info!(command = %command.name, source = %command.source, "command executed"),
            Some(code) => warn!(
                command = %command.name,
                source = %command.source,
                code = %code,
                message = %result.message,
                "command rejected"
            ),
        }

        self.record(command, &result);
        result
    }

    fn run(&self, ctx: &mut C, command: &Command) -> CommandResult {
        let Some(registration) = self.commands.get(&command.name) else {
            return CommandResult::failure(
                ErrorCode::UnknownCommand,
                format!("unknown command '{}'", command.name),
            );
        };

        // Read the policy once, at the instant of dispatch
        let mode = self.policy.get();
        if !mode.allows(command.source) {
            return CommandResult::failure(
                ErrorCode::SourceNotAllowed,
                format!(
                    "source '{}' is not allowed in control mode '{}' ({})",
                    command.source,
                    mode,
                    mode.description()
                ),
            );
        }

        if let Err(e) = validate(registration.params, &command.args) {
            return CommandResult::failure(ErrorCode::InvalidArgs, e.to_string());
        }

        match catch_unwind(AssertUnwindSafe(|| (registration.handler)(ctx, command))) {
            Ok(Ok(outcome)) => CommandResult::ok(outcome.message, outcome.data),
            Ok(Err(e)) => CommandResult::failure(ErrorCode::ExecutionError, format!("{:#}", e)),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(command = %command.name, %reason, "command handler panicked");
                CommandResult::failure(
                    ErrorCode::ExecutionError,
                    format!("handler for '{}' failed: {}", command.name, reason),
                )
            }
        }
    }

    fn record(&mut self, command: Command, result: &CommandResult) {
        for listener in &self.listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&command, result))) {
                error!(reason = %panic_message(panic.as_ref()), "command listener panicked");
            }
        }

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            command,
            result: result.clone(),
        });
    }

    /// The most recent `limit` entries, oldest first
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }
}
