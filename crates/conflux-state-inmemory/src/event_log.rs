use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use conflux_core::{
    CoreError, DomainEvent, DomainEventHandler, FlowNodeInstanceId, FlowNodeState,
    FlowNodeStateChanged, ProcessInstanceId, ProcessInstanceState, ProcessInstanceStateChanged,
};

/// Event handler that keeps every domain event in memory
#[derive(Default)]
pub struct InMemoryEventLog {
    events: RwLock<Vec<Arc<dyn DomainEvent>>>,
}

impl InMemoryEventLog {
    /// Create an empty event log
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, in publication order
    pub async fn events(&self) -> Vec<Arc<dyn DomainEvent>> {
        self.events.read().await.clone()
    }

    /// Event types of one process instance, in publication order
    pub async fn event_types(&self, process_instance_id: &ProcessInstanceId) -> Vec<&'static str> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.process_instance_id() == process_instance_id)
            .map(|e| e.event_type())
            .collect()
    }

    /// States a flow node went through
    pub async fn flow_node_history(&self, flow_node_id: &FlowNodeInstanceId) -> Vec<FlowNodeState> {
        let events = self.events.read().await;
        events
            .iter()
            .filter_map(|e| e.as_any().downcast_ref::<FlowNodeStateChanged>())
            .filter(|e| &e.flow_node_id == flow_node_id)
            .map(|e| e.new_state)
            .collect()
    }

    /// States a process instance went through
    pub async fn process_instance_history(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Vec<ProcessInstanceState> {
        let events = self.events.read().await;
        events
            .iter()
            .filter_map(|e| e.as_any().downcast_ref::<ProcessInstanceStateChanged>())
            .filter(|e| &e.process_instance_id == process_instance_id)
            .map(|e| e.new_state)
            .collect()
    }

    /// Drop everything recorded
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl DomainEventHandler for InMemoryEventLog {
    async fn handle_event(&self, event: Arc<dyn DomainEvent>) -> Result<(), CoreError> {
        self.events.write().await.push(event);
        Ok(())
    }
}
