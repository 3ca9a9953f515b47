//! Mode controller: owns the single active mode instance
//!
//! The controller is the [`TransitionExecutor`] behind the state machine.
//! Topic subscriptions of the active instance forward into one delivery
//! queue, each delivery tagged with the generation it was subscribed
//! under; the coordinator hands them back through [`ModeController::deliver`],
//! which drops anything from an older generation.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::adapters::Capabilities;
use crate::events::{panic_message, Event, MessageBus, SubscriptionId};
use crate::state::{Fallback, ModeId, ReplaceFailure, TransitionExecutor};

use super::{ControllerError, Mode, ModeContext, ModeError, ModeRegistry};

/// An event routed to the mode instance of `generation`
#[derive(Debug, Clone)]
pub struct Delivery {
    pub generation: u64,
    pub event: Event,
}

struct Active {
    mode: Box<dyn Mode>,
    generation: u64,
    subscriptions: Vec<SubscriptionId>,
}

pub struct ModeController {
    registry: ModeRegistry,
    ctx: ModeContext,
    active: Option<Active>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

impl ModeController {
    /// Validate capabilities and enter `standby` at generation 0
    pub fn new(
        registry: ModeRegistry,
        caps: Capabilities,
        bus: MessageBus,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Delivery>), ControllerError> {
        for mode in registry.ids() {
            if let Some(capability) = caps.missing(registry.requires(mode)) {
                return Err(ControllerError::MissingCapability { mode, capability });
            }
        }
        if !registry.contains(ModeId::Standby) {
            return Err(ControllerError::MissingStandby);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut controller = Self {
            registry,
            ctx: ModeContext::new(caps, bus),
            active: None,
            deliveries: tx,
        };

        let standby = controller.registry.build(ModeId::Standby)?;
        controller.enter(standby, 0)?;
        Ok((controller, rx))
    }

    pub fn active_mode(&self) -> Option<ModeId> {
        self.active.as_ref().map(|a| a.mode.id())
    }

    pub fn active_generation(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.generation)
    }

    pub fn registry(&self) -> &ModeRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ModeContext {
        &self.ctx
    }

    /// Hand an event to the active instance
    ///
    /// Returns false when the delivery was stale and dropped.
    pub fn deliver(&mut self, delivery: Delivery) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if active.generation != delivery.generation {
            debug!(
                topic = %delivery.event.topic,
                stale = delivery.generation,
                current = active.generation,
                "dropping stale delivery"
            );
            return false;
        }

        let ctx = &self.ctx;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            active.mode.handle_event(ctx, &delivery.event)
        }));
        if let Err(panic) = outcome {
            error!(
                mode = %active.mode.id(),
                topic = %delivery.event.topic,
                reason = %panic_message(panic.as_ref()),
                "mode event handler panicked"
            );
        }
        true
    }

    /// Run `update()` on the active instance; false means it is finished
    pub fn tick(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return true;
        };

        let ctx = &self.ctx;
        match catch_unwind(AssertUnwindSafe(|| active.mode.update(ctx))) {
            Ok(keep_going) => keep_going,
            Err(panic) => {
                error!(
                    mode = %active.mode.id(),
                    reason = %panic_message(panic.as_ref()),
                    "mode update panicked"
                );
                false
            }
        }
    }

    fn enter(&mut self, mut mode: Box<dyn Mode>, generation: u64) -> Result<(), ModeError> {
        self.ctx.generation = generation;
        mode.on_enter(&self.ctx)?;

        let subscriptions = mode
            .topics()
            .iter()
            .map(|topic| {
                let tx = self.deliveries.clone();
                self.ctx.bus.subscribe(*topic, move |event: &Event| {
                    tx.send(Delivery {
                        generation,
                        event: event.clone(),
                    })
                    .map_err(|_| anyhow::anyhow!("mode delivery queue closed"))
                })
            })
            .collect();

        debug!(mode = %mode.id(), generation, "mode entered");
        self.active = Some(Active {
            mode,
            generation,
            subscriptions,
        });
        Ok(())
    }

    /// Re-enter `from`, or standby when that fails too
    fn restore(&mut self, from: ModeId, generation: u64) -> Fallback {
        let mut candidates = vec![from];
        if from != ModeId::Standby {
            candidates.push(ModeId::Standby);
        }

        for mode in candidates {
            match self.registry.build(mode).and_then(|m| self.enter(m, generation)) {
                Ok(()) => {
                    info!(%mode, generation, "mode restored after failed entry");
                    return Fallback::Entered(mode);
                }
                Err(e) => error!(%mode, error = %e, "could not restore mode"),
            }
        }
        Fallback::Nothing
    }

    fn exit_active(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        for id in active.subscriptions.drain(..) {
            self.ctx.bus.unsubscribe(id);
        }
        if let Err(e) = active.mode.on_exit(&self.ctx) {
            warn!(mode = %active.mode.id(), error = %e, "mode exit failed");
        }
        debug!(mode = %active.mode.id(), generation = active.generation, "mode exited");
    }
}

impl TransitionExecutor for ModeController {
    fn supports(&self, mode: ModeId) -> bool {
        self.registry.contains(mode)
    }

    fn replace_mode(
        &mut self,
        from: ModeId,
        to: ModeId,
        generation: u64,
    ) -> Result<(), ReplaceFailure> {
        // Construction failures leave the current instance untouched
        let next = self.registry.build(to).map_err(ReplaceFailure::untouched)?;

        self.exit_active();

        let Err(error) = self.enter(next, generation) else {
            return Ok(());
        };

        // The failed entry used `generation`; whatever comes back gets a
        // fresh one so deliveries queued for either instance are dropped
        let fallback = self.restore(from, generation + 1);
        Err(ReplaceFailure { error, fallback })
    }

    fn shutdown(&mut self) {
        self.exit_active();
    }
}
