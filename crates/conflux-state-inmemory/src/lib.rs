//! In-memory collaborators for the Conflux engine
//!
//! This crate provides in-memory implementations of the collaborator
//! traits defined in conflux-core: persistence, work dispatch, definition
//! resolution and an event log. It is primarily useful for development,
//! testing, and single-process deployments where durability is not required.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub mod persistence;
pub use persistence::{InMemoryPersistenceService, Tables};

pub mod dispatcher;
pub use dispatcher::{DrainSummary, InMemoryWorkDispatcher};

pub mod resolver;
pub use resolver::InMemoryDefinitionResolver;

pub mod event_log;
pub use event_log::InMemoryEventLog;

use conflux_core::PersistenceService;

/// Provider for in-memory collaborators sharing one set of tables
pub struct InMemoryStateStoreProvider {
    tables: Arc<RwLock<Tables>>,
}

/// Collaborators wired by [`InMemoryStateStoreProvider::create_services`]
pub struct InMemoryServices {
    /// Persistence over the provider's tables
    pub persistence: Arc<InMemoryPersistenceService>,
    /// Work queue
    pub dispatcher: Arc<InMemoryWorkDispatcher>,
    /// Resolver reading definitions from `persistence`
    pub resolver: Arc<InMemoryDefinitionResolver>,
    /// Event log
    pub event_log: Arc<InMemoryEventLog>,
}

impl InMemoryStateStoreProvider {
    /// Create a new in-memory state store provider
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// Create collaborators over the shared tables
    pub fn create_services(&self) -> InMemoryServices {
        let persistence = Arc::new(InMemoryPersistenceService::new(self.tables.clone()));
        let resolver = Arc::new(InMemoryDefinitionResolver::new(
            persistence.clone() as Arc<dyn PersistenceService>
        ));
        debug!("Created in-memory collaborators");

        InMemoryServices {
            persistence,
            dispatcher: Arc::new(InMemoryWorkDispatcher::new()),
            resolver,
            event_log: Arc::new(InMemoryEventLog::new()),
        }
    }
}

impl Default for InMemoryStateStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}
