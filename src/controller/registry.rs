//! Mode registry: how to build each mode and what it needs

use std::collections::HashMap;

use crate::adapters::Capability;
use crate::state::ModeId;

use super::{Mode, ModeError};

pub type ModeFactory = Box<dyn Fn() -> Result<Box<dyn Mode>, ModeError> + Send + Sync>;

pub struct ModeDescriptor {
    pub requires: &'static [Capability],
    factory: ModeFactory,
}

#[derive(Default)]
pub struct ModeRegistry {
    modes: HashMap<ModeId, ModeDescriptor>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: ModeId, requires: &'static [Capability], factory: F)
    where
        F: Fn() -> Result<Box<dyn Mode>, ModeError> + Send + Sync + 'static,
    {
        self.modes.insert(
            id,
            ModeDescriptor {
                requires,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, id: ModeId) -> bool {
        self.modes.contains_key(&id)
    }

    /// Registered modes in declaration order of [`ModeId::ALL`]
    pub fn ids(&self) -> Vec<ModeId> {
        ModeId::ALL
            .into_iter()
            .filter(|id| self.contains(*id))
            .collect()
    }

    pub fn requires(&self, id: ModeId) -> &'static [Capability] {
        self.modes.get(&id).map(|d| d.requires).unwrap_or(&[])
    }

    /// Construct a fresh instance of `id`
    pub fn build(&self, id: ModeId) -> Result<Box<dyn Mode>, ModeError> {
        let descriptor = self.modes.get(&id).ok_or(ModeError::NotRegistered(id))?;
        let mode = (descriptor.factory)()?;
        if mode.id() != id {
            return Err(ModeError::Construct {
                mode: id,
                reason: format!("factory produced a {} instance", mode.id()),
            });
        }
        Ok(mode)
    }
}
