use std::sync::Arc;

use calocore::geometry::service::GeometryService;
use calocore::random::RandomStreams;
use log::{error, info};

use crate::error::{RecoError, Result};

/// Shared collaborators handed to every algorithm at `init`
#[derive(Clone)]
pub struct Services {
    pub geometry: Arc<dyn GeometryService>,
    pub random: Arc<dyn RandomStreams>,
}

impl Services {
    pub fn new(geometry: Arc<dyn GeometryService>, random: Arc<dyn RandomStreams>) -> Self {
        Services { geometry, random }
    }
}

/// Identifies the event being processed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventContext {
    pub run: u32,
    pub event: u64,
}

impl EventContext {
    pub fn new(run: u32, event: u64) -> Self {
        EventContext { run, event }
    }
}

/// A per-event transform. Everything resolved at `init` is immutable;
/// `process` keeps its working storage local so one instance can serve
/// several threads at once.
pub trait Algorithm: Sized + Send + Sync {
    type Config: Clone + Send + Sync;
    type Input<'a>;
    type Output;

    fn init(name: &str, config: Self::Config, services: &Services) -> Result<Self>;

    fn process(&self, input: Self::Input<'_>, ctx: &EventContext) -> Result<Self::Output>;

    fn config(&self) -> &Self::Config;
}

/// Binds an algorithm to its instance name and reports failures with that name
pub struct Factory<A: Algorithm> {
    name: String,
    algorithm: A,
}

impl<A: Algorithm> Factory<A> {
    pub fn init(name: &str, config: A::Config, services: &Services) -> Result<Self> {
        match A::init(name, config, services) {
            Ok(algorithm) => {
                info!(target: name, "initialized");
                Ok(Factory { name: name.to_string(), algorithm })
            }
            Err(e) => {
                error!(target: name, "initialization failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> &A {
        &self.algorithm
    }

    pub fn process(&self, input: A::Input<'_>, ctx: &EventContext) -> Result<A::Output> {
        self.algorithm.process(input, ctx).map_err(|e| {
            error!(target: self.name.as_str(), "event {}: {}", ctx.event, e);
            RecoError::Event { factory: self.name.clone(), event: ctx.event, source: Box::new(e) }
        })
    }
}
