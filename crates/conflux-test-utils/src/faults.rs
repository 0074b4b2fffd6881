//! Fault injection for persistence.

use async_trait::async_trait;
use conflux_core::{
    ChangeSet, CoreError, FlowNodeInstance, PersistenceService, ProcessDefinition,
    ProcessDefinitionId, ProcessInstance,
};
use conflux_expression::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Persistence wrapper that fails a given number of upcoming transitions
pub struct FaultyPersistence {
    inner: Arc<dyn PersistenceService>,
    failures: AtomicUsize,
}

impl FaultyPersistence {
    /// Wrap a persistence service; nothing fails until [`fail_next`](Self::fail_next)
    pub fn new(inner: Arc<dyn PersistenceService>) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` calls to `persist`
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Failures still armed
    pub fn remaining_failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PersistenceService for FaultyPersistence {
    async fn persist(&self, changes: &ChangeSet) -> Result<(), CoreError> {
        if self.take_failure() {
            warn!(flow_nodes = changes.flow_nodes.len(), "Injected persistence failure");
            return Err(CoreError::Persistence("injected failure".to_string()));
        }
        self.inner.persist(changes).await
    }

    async fn load_process_definition(
        &self,
        id: &ProcessDefinitionId,
    ) -> Result<Option<ProcessDefinition>, CoreError> {
        self.inner.load_process_definition(id).await
    }

    async fn store_process_definition(&self, definition: &ProcessDefinition) -> Result<(), CoreError> {
        self.inner.store_process_definition(definition).await
    }

    async fn delete_process_definition(&self, id: &ProcessDefinitionId) -> Result<(), CoreError> {
        self.inner.delete_process_definition(id).await
    }

    async fn save_process_instance(&self, instance: &ProcessInstance) -> Result<(), CoreError> {
        self.inner.save_process_instance(instance).await
    }

    async fn save_flow_node_instance(&self, instance: &FlowNodeInstance) -> Result<(), CoreError> {
        self.inner.save_flow_node_instance(instance).await
    }

    async fn append_to_variable_scope(
        &self,
        container_id: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), CoreError> {
        self.inner
            .append_to_variable_scope(container_id, name, value)
            .await
    }
}
