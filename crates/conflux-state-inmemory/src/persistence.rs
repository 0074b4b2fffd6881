use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use conflux_core::{
    ChangeSet, CoreError, FlowNodeInstance, FlowNodeInstanceId, PersistenceService,
    ProcessDefinition, ProcessDefinitionId, ProcessInstance, ProcessInstanceId,
};
use conflux_expression::Value;

/// Shared tables behind the in-memory persistence service
#[derive(Debug, Default)]
pub struct Tables {
    definitions: HashMap<String, ProcessDefinition>,
    process_instances: HashMap<String, ProcessInstance>,
    flow_nodes: HashMap<String, FlowNodeInstance>,
    variables: HashMap<String, BTreeMap<String, Value>>,
}

/// In-memory implementation of the PersistenceService.
///
/// A whole [`ChangeSet`] is applied under one write lock, so readers never
/// observe half of a transition.
pub struct InMemoryPersistenceService {
    tables: Arc<RwLock<Tables>>,
    transitions: AtomicU64,
}

impl InMemoryPersistenceService {
    /// Create a new in-memory persistence service over shared tables
    pub fn new(tables: Arc<RwLock<Tables>>) -> Self {
        Self {
            tables,
            transitions: AtomicU64::new(0),
        }
    }

    /// Number of change sets applied so far
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::SeqCst)
    }

    /// Stored copy of a process instance
    pub async fn process_instance(&self, id: &ProcessInstanceId) -> Option<ProcessInstance> {
        let tables = self.tables.read().await;
        tables.process_instances.get(&id.0).cloned()
    }

    /// Stored copy of a flow node instance
    pub async fn flow_node_instance(&self, id: &FlowNodeInstanceId) -> Option<FlowNodeInstance> {
        let tables = self.tables.read().await;
        tables.flow_nodes.get(&id.0).cloned()
    }

    /// Stored flow nodes of one process instance, in creation order
    pub async fn flow_node_instances(&self, process_instance_id: &ProcessInstanceId) -> Vec<FlowNodeInstance> {
        let tables = self.tables.read().await;
        let mut nodes: Vec<_> = tables
            .flow_nodes
            .values()
            .filter(|node| &node.process_instance_id == process_instance_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|node| node.sequence);
        nodes
    }

    /// Stored variables of one data scope
    pub async fn variables(&self, container_id: &str) -> BTreeMap<String, Value> {
        let tables = self.tables.read().await;
        tables.variables.get(container_id).cloned().unwrap_or_default()
    }

    /// Ids of every deployed definition
    pub async fn definition_ids(&self) -> Vec<ProcessDefinitionId> {
        let tables = self.tables.read().await;
        let mut ids: Vec<_> = tables
            .definitions
            .keys()
            .map(|key| ProcessDefinitionId(key.clone()))
            .collect();
        ids.sort_by(|a, b| a.0.cmp(&b.0));
        ids
    }
}

#[async_trait]
impl PersistenceService for InMemoryPersistenceService {
    async fn persist(&self, changes: &ChangeSet) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;

        if let Some(instance) = &changes.process_instance {
            tables
                .process_instances
                .insert(instance.id.0.clone(), instance.clone());
        }
        for node in &changes.flow_nodes {
            tables.flow_nodes.insert(node.id.0.clone(), node.clone());
        }
        for write in &changes.variables {
            tables
                .variables
                .entry(write.container_id.clone())
                .or_default()
                .insert(write.name.clone(), write.value.clone());
        }

        let applied = self.transitions.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            transition = applied,
            flow_nodes = changes.flow_nodes.len(),
            variables = changes.variables.len(),
            "Applied change set"
        );
        Ok(())
    }

    async fn load_process_definition(
        &self,
        id: &ProcessDefinitionId,
    ) -> Result<Option<ProcessDefinition>, CoreError> {
        let tables = self.tables.read().await;
        Ok(tables.definitions.get(&id.0).cloned())
    }

    async fn store_process_definition(&self, definition: &ProcessDefinition) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        tables
            .definitions
            .insert(definition.id.0.clone(), definition.clone());
        Ok(())
    }

    async fn delete_process_definition(&self, id: &ProcessDefinitionId) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        tables.definitions.remove(&id.0);
        Ok(())
    }

    async fn save_process_instance(&self, instance: &ProcessInstance) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        tables
            .process_instances
            .insert(instance.id.0.clone(), instance.clone());
        Ok(())
    }

    async fn save_flow_node_instance(&self, instance: &FlowNodeInstance) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        tables.flow_nodes.insert(instance.id.0.clone(), instance.clone());
        Ok(())
    }

    async fn append_to_variable_scope(
        &self,
        container_id: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CoreError> {
        let mut tables = self.tables.write().await;
        tables
            .variables
            .entry(container_id.to_string())
            .or_default()
            .insert(name.to_string(), value.clone());
        Ok(())
    }
}
