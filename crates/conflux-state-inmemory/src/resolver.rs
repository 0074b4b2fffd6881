use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use conflux_core::{
    CoreError, DefinitionResolver, FlowContainerDefinition, FlowNodeKind, PersistenceService,
    ProcessDefinitionId, ResolutionProblem, ResolutionProblemKind,
};

/// In-memory implementation of the DefinitionResolver.
///
/// A definition resolves when every parameter has a value, every connector
/// a node names is registered and every actor is mapped to at least one
/// member.
pub struct InMemoryDefinitionResolver {
    persistence: Arc<dyn PersistenceService>,
    connectors: RwLock<HashSet<String>>,
    actor_mappings: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryDefinitionResolver {
    /// Create a resolver reading definitions through `persistence`
    pub fn new(persistence: Arc<dyn PersistenceService>) -> Self {
        Self {
            persistence,
            connectors: RwLock::new(HashSet::new()),
            actor_mappings: RwLock::new(HashMap::new()),
        }
    }

    /// Make a connector implementation available
    pub async fn register_connector(&self, name: impl Into<String>) {
        let mut connectors = self.connectors.write().await;
        connectors.insert(name.into());
    }

    /// Map an actor to a user or group
    pub async fn map_actor(&self, actor: impl Into<String>, member: impl Into<String>) {
        let mut mappings = self.actor_mappings.write().await;
        mappings.entry(actor.into()).or_default().insert(member.into());
    }

    /// Members an actor is mapped to
    pub async fn actor_members(&self, actor: &str) -> BTreeSet<String> {
        let mappings = self.actor_mappings.read().await;
        mappings.get(actor).cloned().unwrap_or_default()
    }
}

/// Actors and connectors named anywhere in a container tree
fn collect_requirements(
    container: &FlowContainerDefinition,
    actors: &mut BTreeSet<String>,
    connectors: &mut BTreeSet<String>,
) {
    for node in &container.nodes {
        if let Some(actor) = &node.actor {
            actors.insert(actor.clone());
        }
        if let Some(connector) = &node.connector {
            connectors.insert(connector.clone());
        }
        if let FlowNodeKind::SubProcess { container } = &node.kind {
            collect_requirements(container, actors, connectors);
        }
    }
}

#[async_trait]
impl DefinitionResolver for InMemoryDefinitionResolver {
    async fn get_resolution_problems(
        &self,
        definition_id: &ProcessDefinitionId,
    ) -> Result<Vec<ResolutionProblem>, CoreError> {
        let definition = self
            .persistence
            .load_process_definition(definition_id)
            .await?
            .ok_or_else(|| CoreError::ProcessDefinitionNotFound(definition_id.0.clone()))?;

        let mut problems = Vec::new();

        for parameter in definition.parameters.iter().filter(|p| p.value.is_none()) {
            problems.push(ResolutionProblem::new(
                ResolutionProblemKind::Parameter,
                &parameter.name,
                "no value set",
            ));
        }

        let mut actors: BTreeSet<String> = definition.actors.iter().map(|a| a.name.clone()).collect();
        let mut connectors = BTreeSet::new();
        collect_requirements(&definition.container, &mut actors, &mut connectors);

        {
            let registered = self.connectors.read().await;
            for connector in connectors.iter().filter(|c| !registered.contains(*c)) {
                problems.push(ResolutionProblem::new(
                    ResolutionProblemKind::Connector,
                    connector,
                    "no implementation registered",
                ));
            }
        }

        {
            let mappings = self.actor_mappings.read().await;
            for actor in actors
                .iter()
                .filter(|a| mappings.get(*a).map_or(true, BTreeSet::is_empty))
            {
                problems.push(ResolutionProblem::new(
                    ResolutionProblemKind::Actor,
                    actor,
                    "not mapped to any user or group",
                ));
            }
        }

        debug!(
            definition_id = %definition_id,
            problems = problems.len(),
            "Resolved definition configuration"
        );
        Ok(problems)
    }
}
