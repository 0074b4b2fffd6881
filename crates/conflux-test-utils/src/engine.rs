//! In-memory engine harness.
//!
//! Wires the in-memory collaborators, the metrics handler and an event log
//! around a [`ProcessInstanceController`] and drains queued work inline.

use conflux_core::{
    CompositeEventHandler, CoreError, DomainEventHandler, EngineConfig, FlowNodeInstance,
    FlowNodeInstanceId, FlowNodeState, NodeId, PersistenceService, ProcessDefinition,
    ProcessDefinitionId, ProcessDefinitionService, ProcessInstance, ProcessInstanceController,
    ProcessInstanceId, WorkDispatcher,
};
use conflux_expression::{ScriptCache, Value};
use conflux_monitoring::{EngineMetrics, MetricsEventHandler};
use conflux_state_inmemory::{
    DrainSummary, InMemoryDefinitionResolver, InMemoryEventLog, InMemoryPersistenceService,
    InMemoryStateStoreProvider, InMemoryWorkDispatcher,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::faults::FaultyPersistence;

/// Engine over in-memory collaborators
pub struct TestEngine {
    /// Controller under test
    pub controller: Arc<ProcessInstanceController>,
    /// Deployment service
    pub definitions: ProcessDefinitionService,
    /// Backing store
    pub persistence: Arc<InMemoryPersistenceService>,
    /// Fault injection in front of the backing store
    pub faults: Arc<FaultyPersistence>,
    /// Work queue
    pub dispatcher: Arc<InMemoryWorkDispatcher>,
    /// Definition resolver
    pub resolver: Arc<InMemoryDefinitionResolver>,
    /// Every published event
    pub event_log: Arc<InMemoryEventLog>,
    /// Engine counters
    pub metrics: Arc<EngineMetrics>,
    /// Compiled-script cache shared by the evaluator
    pub script_cache: Arc<dyn ScriptCache>,
}

impl TestEngine {
    /// Engine with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with the given configuration
    pub fn with_config(config: EngineConfig) -> Self {
        let services = InMemoryStateStoreProvider::new().create_services();
        let faults = Arc::new(FaultyPersistence::new(
            services.persistence.clone() as Arc<dyn PersistenceService>
        ));
        let script_cache = config.build_script_cache();
        let evaluator = Arc::new(config.build_evaluator(Arc::clone(&script_cache)));

        let metrics_handler = MetricsEventHandler::new();
        let metrics = metrics_handler.metrics();
        let event_handler = CompositeEventHandler::new()
            .with(services.event_log.clone() as Arc<dyn DomainEventHandler>)
            .with(Arc::new(metrics_handler));

        let controller = Arc::new(ProcessInstanceController::new(
            faults.clone() as Arc<dyn PersistenceService>,
            services.dispatcher.clone() as Arc<dyn WorkDispatcher>,
            services.resolver.clone(),
            Arc::clone(&evaluator),
            Arc::new(event_handler),
            config,
        ));
        let definitions = ProcessDefinitionService::new(
            faults.clone() as Arc<dyn PersistenceService>,
            evaluator,
            Arc::clone(&script_cache),
        );

        Self {
            controller,
            definitions,
            persistence: services.persistence,
            faults,
            dispatcher: services.dispatcher,
            resolver: services.resolver,
            event_log: services.event_log,
            metrics,
            script_cache,
        }
    }

    /// Deploy a definition
    pub async fn deploy(&self, definition: ProcessDefinition) -> Result<ProcessDefinitionId, CoreError> {
        self.definitions.deploy(definition).await
    }

    /// Start an instance and run its automatic steps
    pub async fn start(
        &self,
        definition_id: &ProcessDefinitionId,
        variables: HashMap<String, Value>,
    ) -> Result<ProcessInstance, CoreError> {
        let instance = self
            .controller
            .start_process(definition_id, variables, Some("tester".to_string()))
            .await?;
        self.drain().await;
        Ok(instance)
    }

    /// Deploy, then start with no initial variables
    pub async fn deploy_and_start(&self, definition: ProcessDefinition) -> Result<ProcessInstance, CoreError> {
        let id = self.deploy(definition).await?;
        self.start(&id, HashMap::new()).await
    }

    /// Run queued work until none is left
    pub async fn drain(&self) -> DrainSummary {
        let summary = self.dispatcher.run_until_idle(self.controller.as_ref()).await;
        debug!(
            processed = summary.processed,
            failures = summary.failures.len(),
            "Drained work queue"
        );
        summary
    }

    /// Latest flow node instance created for a definition node
    pub async fn node(
        &self,
        process_instance_id: &ProcessInstanceId,
        node_id: &str,
    ) -> Result<FlowNodeInstance, CoreError> {
        self.nodes_named(process_instance_id, node_id)
            .await?
            .pop()
            .ok_or_else(|| CoreError::FlowNodeNotFound(format!("{}/{}", process_instance_id, node_id)))
    }

    /// Every flow node instance created for a definition node, oldest first
    pub async fn nodes_named(
        &self,
        process_instance_id: &ProcessInstanceId,
        node_id: &str,
    ) -> Result<Vec<FlowNodeInstance>, CoreError> {
        let node_id = NodeId(node_id.to_string());
        Ok(self
            .controller
            .flow_node_instances(process_instance_id)
            .await?
            .into_iter()
            .filter(|n| n.node_id == node_id)
            .collect())
    }

    /// State of the latest instance of a definition node
    pub async fn state_of(
        &self,
        process_instance_id: &ProcessInstanceId,
        node_id: &str,
    ) -> Result<FlowNodeState, CoreError> {
        Ok(self.node(process_instance_id, node_id).await?.state)
    }

    /// Complete the latest instance of a definition node, then drain
    pub async fn complete(
        &self,
        process_instance_id: &ProcessInstanceId,
        node_id: &str,
    ) -> Result<FlowNodeInstance, CoreError> {
        let node = self.node(process_instance_id, node_id).await?;
        let completed = self.controller.complete_flow_node(&node.id, "tester").await?;
        self.drain().await;
        Ok(completed)
    }

    /// Complete a flow node instance by id, then drain
    pub async fn complete_id(&self, flow_node_id: &FlowNodeInstanceId) -> Result<FlowNodeInstance, CoreError> {
        let completed = self.controller.complete_flow_node(flow_node_id, "tester").await?;
        self.drain().await;
        Ok(completed)
    }

    /// Current snapshot of a process instance
    pub async fn instance(&self, process_instance_id: &ProcessInstanceId) -> Result<ProcessInstance, CoreError> {
        self.controller.process_instance(process_instance_id).await
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}
