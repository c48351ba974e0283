//! Collaborators shared by every node of a run, and the plain-data engine config.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::EventEmitter;
use crate::executor::TrialExecutor;
use crate::sampling::{RandomSampler, Randomizer, Sampler};

/// Configuration for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seed for the default sampler; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Event channel capacity; 256 when absent.
    #[serde(default)]
    pub event_capacity: Option<usize>,
}

/// Executor, sampler, randomizer and event emitter for one run. Cloning yields
/// another handle to the same collaborators.
#[derive(Clone)]
pub struct Environment {
    executor: Arc<dyn TrialExecutor>,
    sampler: Arc<dyn Sampler>,
    randomizer: Arc<dyn Randomizer>,
    events: EventEmitter,
}

impl Environment {
    /// Defaults for everything but the executor.
    pub fn new(executor: Arc<dyn TrialExecutor>) -> Self {
        Self::builder(executor).build()
    }

    pub fn from_config(executor: Arc<dyn TrialExecutor>, config: &EngineConfig) -> Self {
        Self::builder(executor).config(config).build()
    }

    pub fn builder(executor: Arc<dyn TrialExecutor>) -> EnvironmentBuilder {
        EnvironmentBuilder {
            executor,
            sampler: None,
            randomizer: None,
            events: None,
            config: EngineConfig::default(),
        }
    }

    pub fn executor(&self) -> &dyn TrialExecutor {
        self.executor.as_ref()
    }

    pub fn sampler(&self) -> &dyn Sampler {
        self.sampler.as_ref()
    }

    pub fn randomizer(&self) -> &dyn Randomizer {
        self.randomizer.as_ref()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }
}

pub struct EnvironmentBuilder {
    executor: Arc<dyn TrialExecutor>,
    sampler: Option<Arc<dyn Sampler>>,
    randomizer: Option<Arc<dyn Randomizer>>,
    events: Option<EventEmitter>,
    config: EngineConfig,
}

impl EnvironmentBuilder {
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn randomizer(mut self, randomizer: Arc<dyn Randomizer>) -> Self {
        self.randomizer = Some(randomizer);
        self
    }

    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Missing sampler and randomizer share one [`RandomSampler`].
    pub fn build(self) -> Environment {
        let default_rng = Arc::new(match self.config.seed {
            Some(seed) => RandomSampler::seeded(seed),
            None => RandomSampler::new(),
        });
        let events = self
            .events
            .unwrap_or_else(|| EventEmitter::new(self.config.event_capacity.unwrap_or(256)));
        Environment {
            executor: self.executor,
            sampler: self.sampler.unwrap_or_else(|| default_rng.clone()),
            randomizer: self.randomizer.unwrap_or(default_rng),
            events,
        }
    }
}
