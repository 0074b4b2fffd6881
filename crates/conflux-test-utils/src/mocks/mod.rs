//! Mocks of the engine's collaborator traits.
//!
//! Generated with mockall, for tests that need to script a collaborator's
//! answers or assert on the calls the engine makes.

use async_trait::async_trait;
use conflux_core::{
    ChangeSet, CoreError, DefinitionResolver, DomainEvent, DomainEventHandler, FlowNodeInstance,
    PersistenceService, ProcessDefinition, ProcessDefinitionId, ProcessInstance,
    ResolutionProblem, WorkDispatcher, WorkItem,
};
use conflux_expression::Value;
use mockall::mock;
use std::sync::Arc;

mock! {
    pub Persistence {}

    #[async_trait]
    impl PersistenceService for Persistence {
        async fn persist(&self, changes: &ChangeSet) -> Result<(), CoreError>;
        async fn load_process_definition(
            &self,
            id: &ProcessDefinitionId,
        ) -> Result<Option<ProcessDefinition>, CoreError>;
        async fn store_process_definition(&self, definition: &ProcessDefinition) -> Result<(), CoreError>;
        async fn delete_process_definition(&self, id: &ProcessDefinitionId) -> Result<(), CoreError>;
        async fn save_process_instance(&self, instance: &ProcessInstance) -> Result<(), CoreError>;
        async fn save_flow_node_instance(&self, instance: &FlowNodeInstance) -> Result<(), CoreError>;
        async fn append_to_variable_scope(
            &self,
            container_id: &str,
            name: &str,
            value: &Value,
        ) -> Result<(), CoreError>;
    }
}

mock! {
    pub Dispatcher {}

    #[async_trait]
    impl WorkDispatcher for Dispatcher {
        async fn enqueue(&self, container_id: &str, work: WorkItem) -> Result<(), CoreError>;
    }
}

mock! {
    pub Resolver {}

    #[async_trait]
    impl DefinitionResolver for Resolver {
        async fn get_resolution_problems(
            &self,
            definition_id: &ProcessDefinitionId,
        ) -> Result<Vec<ResolutionProblem>, CoreError>;
    }
}

mock! {
    pub EventHandler {}

    #[async_trait]
    impl DomainEventHandler for EventHandler {
        async fn handle_event(&self, event: Arc<dyn DomainEvent>) -> Result<(), CoreError>;
    }
}

/// Resolver reporting no problems for any definition
pub fn resolved() -> MockResolver {
    let mut resolver = MockResolver::new();
    resolver
        .expect_get_resolution_problems()
        .returning(|_| Ok(Vec::new()));
    resolver
}

/// Dispatcher refusing every work item
pub fn refusing_dispatcher(reason: &'static str) -> MockDispatcher {
    let mut dispatcher = MockDispatcher::new();
    dispatcher
        .expect_enqueue()
        .returning(move |_, _| Err(CoreError::Dispatch(reason.to_string())));
    dispatcher
}
