use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::LocalObjectStorage;
use crate::core::{EventBus, IngestLimits, Orchestrator};

pub type GuardedOrchestrator = Arc<Orchestrator>;
pub type GuardedStorage = Arc<LocalObjectStorage>;
pub type GuardedEventBus = Arc<dyn EventBus>;

#[derive(Clone)]
pub struct ServerState {
    pub orchestrator: GuardedOrchestrator,
    pub storage: GuardedStorage,
    pub bus: GuardedEventBus,
    pub limits: IngestLimits,
    /// Bearer token -> user id
    pub tokens: Arc<HashMap<String, String>>,
}

impl ServerState {
    pub fn new(
        orchestrator: GuardedOrchestrator,
        storage: GuardedStorage,
        bus: GuardedEventBus,
        limits: IngestLimits,
        tokens: HashMap<String, String>,
    ) -> Self {
        Self {
            orchestrator,
            storage,
            bus,
            limits,
            tokens: Arc::new(tokens),
        }
    }
}
