//! In-memory state of one process instance and the transaction that
//! mutates it.
//!
//! Every mutating operation works on a [`Transaction`] holding a private copy
//! of the instance state. The copy replaces the live state only after the
//! persistence collaborator accepted the transaction's change set.

use chrono::Utc;
use conflux_expression::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::Arc;

use crate::domain::events::{DomainEvent, FlowNodeStateChanged};
use crate::domain::flow_node::{FlowNodeInstance, FlowNodeInstanceId, FlowNodeState, ParentContainer};
use crate::domain::gateway::GatewayArena;
use crate::domain::process_definition::{
    FlowContainerDefinition, FlowNodeDefinition, FlowNodeKind, ProcessDefinition,
};
use crate::domain::process_instance::{ProcessInstance, ProcessInstanceState};
use crate::domain::repository::{ChangeSet, VariableWrite};
use crate::domain::work::WorkItem;
use crate::CoreError;

/// Live state of one process instance
#[derive(Debug, Clone)]
pub(crate) struct InstanceRuntime {
    pub instance: ProcessInstance,
    pub definition: Arc<ProcessDefinition>,
    pub flow_nodes: BTreeMap<FlowNodeInstanceId, FlowNodeInstance>,
    pub gateways: GatewayArena,
    /// Data scopes keyed by container id
    pub variables: HashMap<String, BTreeMap<String, Value>>,
    pub next_sequence: u64,
}

impl InstanceRuntime {
    pub fn new(definition: Arc<ProcessDefinition>, instance: ProcessInstance) -> Self {
        Self {
            instance,
            definition,
            flow_nodes: BTreeMap::new(),
            gateways: GatewayArena::new(),
            variables: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn root(&self) -> ParentContainer {
        ParentContainer::ProcessInstance(self.instance.id.clone())
    }

    pub fn node(&self, id: &FlowNodeInstanceId) -> Result<&FlowNodeInstance, CoreError> {
        self.flow_nodes
            .get(id)
            .ok_or_else(|| CoreError::FlowNodeNotFound(id.0.clone()))
    }

    /// Non-terminal flow nodes owned by a container, in creation order
    pub fn live_nodes(&self, container_id: &str) -> Vec<&FlowNodeInstance> {
        let mut nodes: Vec<_> = self
            .flow_nodes
            .values()
            .filter(|n| n.is_live() && n.parent.id() == container_id)
            .collect();
        nodes.sort_by_key(|n| n.sequence);
        nodes
    }

    /// Definition of the graph a container executes
    pub fn container_definition(
        &self,
        container: &ParentContainer,
    ) -> Result<&FlowContainerDefinition, CoreError> {
        match container {
            ParentContainer::ProcessInstance(_) => Ok(&self.definition.container),
            ParentContainer::Activity(activity_id) => {
                let activity = self.node(activity_id)?;
                match &self.node_definition(activity)?.kind {
                    FlowNodeKind::SubProcess { container } => Ok(container),
                    _ => Err(CoreError::InvalidDefinition(format!(
                        "flow node '{}' does not own a container",
                        activity.node_id
                    ))),
                }
            }
        }
    }

    pub fn node_definition(&self, node: &FlowNodeInstance) -> Result<&FlowNodeDefinition, CoreError> {
        self.container_definition(&node.parent)?
            .node(&node.node_id)
            .ok_or_else(|| {
                CoreError::InvalidDefinition(format!("unknown flow node '{}'", node.node_id))
            })
    }

    /// Containers whose data is visible from `container`, innermost first
    pub fn scope_chain(&self, container: &ParentContainer) -> Vec<ParentContainer> {
        let mut chain = vec![container.clone()];
        let mut current = container.clone();
        while let ParentContainer::Activity(activity_id) = &current {
            match self.flow_nodes.get(activity_id) {
                Some(activity) => {
                    current = activity.parent.clone();
                    chain.push(current.clone());
                }
                None => break,
            }
        }
        chain
    }

    /// Variables visible from a container; inner scopes shadow outer ones
    pub fn visible_variables(&self, container: &ParentContainer) -> HashMap<String, Value> {
        let mut values = HashMap::new();
        for scope in self.scope_chain(container).iter().rev() {
            if let Some(scope_values) = self.variables.get(scope.id()) {
                values.extend(scope_values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        values
    }

    /// Innermost scope declaring `name`, else the process scope
    pub fn declaring_scope(&self, container: &ParentContainer, name: &str) -> String {
        self.scope_chain(container)
            .iter()
            .find(|scope| {
                self.container_definition(scope)
                    .map(|def| def.data(name).is_some())
                    .unwrap_or(false)
            })
            .map(|scope| scope.id().to_string())
            .unwrap_or_else(|| self.instance.root_container_id.clone())
    }
}

/// Working copy of an instance plus everything the change must publish
pub(crate) struct Transaction {
    runtime: InstanceRuntime,
    instance_dirty: bool,
    dirty_nodes: BTreeSet<FlowNodeInstanceId>,
    created: Vec<FlowNodeInstanceId>,
    variable_writes: Vec<VariableWrite>,
    work: Vec<(String, WorkItem)>,
    events: Vec<Arc<dyn DomainEvent>>,
}

impl Deref for Transaction {
    type Target = InstanceRuntime;

    fn deref(&self) -> &Self::Target {
        &self.runtime
    }
}

impl Transaction {
    pub fn new(runtime: InstanceRuntime) -> Self {
        let mut tx = Self {
            runtime,
            instance_dirty: false,
            dirty_nodes: BTreeSet::new(),
            created: Vec::new(),
            variable_writes: Vec::new(),
            work: Vec::new(),
            events: Vec::new(),
        };
        // a fresh instance carries its creation event
        tx.drain_instance_events();
        tx
    }

    pub fn interrupting(&self) -> bool {
        self.runtime.instance.state.is_interrupting()
    }

    pub fn transition_instance(&mut self, next: ProcessInstanceState) -> Result<(), CoreError> {
        self.runtime.instance.transition_to(next)?;
        self.instance_dirty = true;
        self.drain_instance_events();
        Ok(())
    }

    pub fn instance_mut(&mut self) -> &mut ProcessInstance {
        self.instance_dirty = true;
        &mut self.runtime.instance
    }

    pub fn gateways_mut(&mut self) -> &mut GatewayArena {
        &mut self.runtime.gateways
    }

    pub fn node_mut(&mut self, id: &FlowNodeInstanceId) -> Result<&mut FlowNodeInstance, CoreError> {
        let node = self
            .runtime
            .flow_nodes
            .get_mut(id)
            .ok_or_else(|| CoreError::FlowNodeNotFound(id.0.clone()))?;
        self.dirty_nodes.insert(id.clone());
        Ok(node)
    }

    /// Move a flow node to `next`, recording the state change
    pub fn transition_node(
        &mut self,
        id: &FlowNodeInstanceId,
        next: FlowNodeState,
    ) -> Result<FlowNodeState, CoreError> {
        let node = self.node_mut(id)?;
        let previous = node.transition_to(next)?;
        let event = FlowNodeStateChanged {
            process_instance_id: node.process_instance_id.clone(),
            flow_node_id: node.id.clone(),
            node_id: node.node_id.clone(),
            node_type: node.node_type,
            old_state: Some(previous),
            new_state: next,
            timestamp: node.reached_state_at,
        };
        tracing::debug!(
            process_instance_id = %event.process_instance_id,
            flow_node_id = %event.flow_node_id,
            node = %event.node_id,
            from = %previous,
            state = %next,
            "Flow node transition"
        );
        self.events.push(Arc::new(event));
        Ok(previous)
    }

    /// Next creation sequence number
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.runtime.next_sequence;
        self.runtime.next_sequence += 1;
        sequence
    }

    pub fn insert_node(&mut self, node: FlowNodeInstance) -> FlowNodeInstanceId {
        let id = node.id.clone();
        self.events.push(Arc::new(FlowNodeStateChanged {
            process_instance_id: node.process_instance_id.clone(),
            flow_node_id: id.clone(),
            node_id: node.node_id.clone(),
            node_type: node.node_type,
            old_state: None,
            new_state: node.state,
            timestamp: node.created_at,
        }));
        self.runtime.flow_nodes.insert(id.clone(), node);
        self.dirty_nodes.insert(id.clone());
        self.created.push(id.clone());
        id
    }

    pub fn write_variable(&mut self, container_id: &str, name: &str, value: Value) {
        self.runtime
            .variables
            .entry(container_id.to_string())
            .or_default()
            .insert(name.to_string(), value.clone());
        self.variable_writes.push(VariableWrite {
            container_id: container_id.to_string(),
            name: name.to_string(),
            value,
        });
    }

    pub fn enqueue(&mut self, container_id: &str, work: WorkItem) {
        self.work.push((container_id.to_string(), work));
    }

    pub fn record_event(&mut self, event: Arc<dyn DomainEvent>) {
        self.events.push(event);
    }

    fn drain_instance_events(&mut self) {
        let drained = self.runtime.instance.take_events();
        self.events.extend(drained.into_iter().map(Arc::from));
    }

    /// Changes the persistence collaborator must accept
    pub fn change_set(&self) -> ChangeSet {
        ChangeSet {
            process_instance: self.instance_dirty.then(|| self.runtime.instance.clone()),
            flow_nodes: self
                .dirty_nodes
                .iter()
                .filter_map(|id| self.runtime.flow_nodes.get(id).cloned())
                .collect(),
            variables: self.variable_writes.clone(),
        }
    }

    /// Split into the new state and what has to be published after commit
    pub fn into_parts(mut self) -> (InstanceRuntime, Published) {
        if self.instance_dirty {
            self.runtime.instance.updated_at = Utc::now();
        }
        (
            self.runtime,
            Published {
                created: self.created,
                work: self.work,
                events: self.events,
            },
        )
    }
}

/// Side effects released once a transaction committed
pub(crate) struct Published {
    pub created: Vec<FlowNodeInstanceId>,
    pub work: Vec<(String, WorkItem)>,
    pub events: Vec<Arc<dyn DomainEvent>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow_node::FlowNodeType;
    use crate::domain::process_definition::{DataDefinition, NodeId};
    use conflux_expression::ReturnType;

    const NESTED: &str = r#"
id: nested
name: Nested
version: "1"
container:
  data:
    - { name: total, return_type: long }
  nodes:
    - id: start
      type: start_event
    - id: sub
      type: sub_process
      container:
        data:
          - { name: line, return_type: string }
        nodes:
          - id: inner
            type: automatic_task
"#;

    fn runtime() -> InstanceRuntime {
        let definition = ProcessDefinition::from_yaml(NESTED).unwrap();
        let instance = ProcessInstance::new(&definition, None);
        InstanceRuntime::new(Arc::new(definition), instance)
    }

    fn add(tx: &mut Transaction, node: &str, node_type: FlowNodeType, parent: ParentContainer) -> FlowNodeInstanceId {
        let sequence = tx.next_sequence();
        let pid = tx.instance.id.clone();
        tx.insert_node(FlowNodeInstance::new(
            NodeId(node.into()),
            node.into(),
            node_type,
            pid,
            parent,
            FlowNodeState::Ready,
            sequence,
            None,
            Vec::new(),
        ))
    }

    #[test]
    fn test_change_set_tracks_dirty_entities() {
        let mut tx = Transaction::new(runtime());
        let root = tx.root();
        let start = add(&mut tx, "start", FlowNodeType::StartEvent, root.clone());
        tx.transition_node(&start, FlowNodeState::Executing).unwrap();
        tx.write_variable(root.id(), "total", Value::Long(3));

        let changes = tx.change_set();
        assert!(changes.process_instance.is_none());
        assert_eq!(changes.flow_nodes.len(), 1);
        assert_eq!(changes.flow_nodes[0].state, FlowNodeState::Executing);
        assert_eq!(changes.variables.len(), 1);

        tx.transition_instance(ProcessInstanceState::Initializing).unwrap();
        assert!(tx.change_set().process_instance.is_some());

        let (runtime, published) = tx.into_parts();
        assert_eq!(published.created, vec![start]);
        // created + creation + transition + initializing
        assert_eq!(published.events.len(), 4);
        assert_eq!(runtime.variables[root.id()]["total"], Value::Long(3));
    }

    #[test]
    fn test_scopes() {
        let mut tx = Transaction::new(runtime());
        let root = tx.root();
        let sub = add(&mut tx, "sub", FlowNodeType::SubProcess, root.clone());
        let activity = ParentContainer::Activity(sub.clone());

        tx.write_variable(root.id(), "total", Value::Long(1));
        tx.write_variable(root.id(), "line", Value::String("outer".into()));
        tx.write_variable(activity.id(), "line", Value::String("inner".into()));

        let visible = tx.visible_variables(&activity);
        assert_eq!(visible["total"], Value::Long(1));
        assert_eq!(visible["line"], Value::String("inner".into()));

        assert_eq!(tx.declaring_scope(&activity, "line"), sub.0);
        assert_eq!(tx.declaring_scope(&activity, "total"), root.id());
        assert_eq!(tx.declaring_scope(&activity, "undeclared"), root.id());

        let inner = tx.container_definition(&activity).unwrap();
        assert_eq!(
            inner.data,
            vec![DataDefinition {
                name: "line".into(),
                return_type: ReturnType::String,
                default_value: None,
            }]
        );
    }

    #[test]
    fn test_live_nodes_in_creation_order() {
        let mut tx = Transaction::new(runtime());
        let root = tx.root();
        let first = add(&mut tx, "start", FlowNodeType::StartEvent, root.clone());
        let second = add(&mut tx, "sub", FlowNodeType::SubProcess, root.clone());
        tx.transition_node(&first, FlowNodeState::Aborting).unwrap();
        tx.transition_node(&first, FlowNodeState::Aborted).unwrap();

        let live: Vec<_> = tx.live_nodes(root.id()).into_iter().map(|n| n.id.clone()).collect();
        assert_eq!(live, vec![second]);
    }
}
