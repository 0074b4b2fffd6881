//! Process definitions: the immutable graph an instance executes.

use conflux_expression::{Expression, ExpressionError, ReturnType, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use crate::CoreError;

/// Number of classification label slots on a process instance
pub const STRING_INDEX_SLOTS: usize = 5;

/// Value object: Process definition ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessDefinitionId(pub String);

/// Value object: Flow node definition ID, unique inside its container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Value object: Transition definition ID, unique inside its container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub String);

macro_rules! display_id {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_id!(ProcessDefinitionId, NodeId, TransitionId);

/// Gateway behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// AND: every branch
    Parallel,
    /// OR: every branch whose guard holds
    Inclusive,
    /// XOR: the first branch whose guard holds
    Exclusive,
}

/// What a flow node does when it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowNodeKind {
    /// Entry point of a container
    StartEvent,
    /// Ends one branch
    EndEvent,
    /// Ends its whole container, aborting competing branches
    TerminateEndEvent,
    /// Completed by the engine as soon as it runs
    AutomaticTask,
    /// Waits for an actor to complete it
    HumanTask,
    /// Waits for an external trigger such as a timer or message
    IntermediateCatchEvent,
    /// Split and/or merge of branches
    Gateway {
        /// Gateway behavior
        gateway: GatewayKind,
    },
    /// Embedded sub-process owning its own flow nodes
    SubProcess {
        /// Child container
        container: FlowContainerDefinition,
    },
}

impl FlowNodeKind {
    /// Whether the engine completes the node without outside input
    pub fn is_automatic(&self) -> bool {
        matches!(
            self,
            FlowNodeKind::StartEvent
                | FlowNodeKind::EndEvent
                | FlowNodeKind::TerminateEndEvent
                | FlowNodeKind::AutomaticTask
                | FlowNodeKind::Gateway { .. }
        )
    }

    /// Gateway behavior, if this is a gateway
    pub fn gateway(&self) -> Option<GatewayKind> {
        match self {
            FlowNodeKind::Gateway { gateway } => Some(*gateway),
            _ => None,
        }
    }
}

/// Assignment of an expression result to a variable on completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Target variable
    pub variable: String,
    /// Value to assign
    pub expression: Expression,
}

/// Variable declaration of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDefinition {
    /// Variable name
    pub name: String,
    /// Declared type
    pub return_type: ReturnType,
    /// Initial value, evaluated when the container is entered
    #[serde(default)]
    pub default_value: Option<Expression>,
}

/// One node of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNodeDefinition {
    /// Node id
    pub id: NodeId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Node behavior
    #[serde(flatten)]
    pub kind: FlowNodeKind,
    /// Inputs evaluated when the node starts executing
    #[serde(default)]
    pub inputs: BTreeMap<String, Expression>,
    /// Assignments evaluated on completion
    #[serde(default)]
    pub outputs: Vec<Operation>,
    /// Actor allowed to perform a human task
    #[serde(default)]
    pub actor: Option<String>,
    /// Taken when no other guard holds
    #[serde(default)]
    pub default_transition: Option<TransitionId>,
    /// Connector implementation the node requires
    #[serde(default)]
    pub connector: Option<String>,
}

impl FlowNodeDefinition {
    /// Node with no inputs, outputs or actor
    pub fn new(id: impl Into<String>, kind: FlowNodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: NodeId(id),
            kind,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            actor: None,
            default_transition: None,
            connector: None,
        }
    }
}

/// Directed edge between two nodes of a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    /// Transition id
    pub id: TransitionId,
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Guard; unconditional when absent
    #[serde(default)]
    pub condition: Option<Expression>,
}

/// A set of nodes and transitions: the process itself or a sub-process
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowContainerDefinition {
    /// Nodes
    #[serde(default)]
    pub nodes: Vec<FlowNodeDefinition>,
    /// Transitions
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
    /// Variables scoped to this container
    #[serde(default)]
    pub data: Vec<DataDefinition>,
}

impl FlowContainerDefinition {
    /// Find a node
    pub fn node(&self, id: &NodeId) -> Option<&FlowNodeDefinition> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Find a transition
    pub fn transition(&self, id: &TransitionId) -> Option<&TransitionDefinition> {
        self.transitions.iter().find(|t| &t.id == id)
    }

    /// Transitions entering a node, in definition order
    pub fn incoming(&self, id: &NodeId) -> Vec<&TransitionDefinition> {
        self.transitions.iter().filter(|t| &t.target == id).collect()
    }

    /// Transitions leaving a node, in definition order
    pub fn outgoing(&self, id: &NodeId) -> Vec<&TransitionDefinition> {
        self.transitions.iter().filter(|t| &t.source == id).collect()
    }

    /// Nodes with no incoming transition
    pub fn start_nodes(&self) -> Vec<&FlowNodeDefinition> {
        self.nodes
            .iter()
            .filter(|n| !self.transitions.iter().any(|t| t.target == n.id))
            .collect()
    }

    /// Variable declaration
    pub fn data(&self, name: &str) -> Option<&DataDefinition> {
        self.data.iter().find(|d| d.name == name)
    }

    /// Whether tokens must be synchronized before the node may run
    pub fn is_join(&self, id: &NodeId) -> bool {
        let synchronizing = matches!(
            self.node(id).and_then(|n| n.kind.gateway()),
            Some(GatewayKind::Parallel) | Some(GatewayKind::Inclusive)
        );
        synchronizing && self.incoming(id).len() > 1
    }

    /// Transitions reachable from `from` by following outgoing edges,
    /// never expanding past `blocked`
    pub fn reachable_transitions(&self, from: &NodeId, blocked: &NodeId) -> HashSet<TransitionId> {
        let mut reached = HashSet::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from.clone()]);

        while let Some(node) = queue.pop_front() {
            if !visited.insert(node.clone()) {
                continue;
            }
            for transition in self.outgoing(&node) {
                reached.insert(transition.id.clone());
                if &transition.target != blocked {
                    queue.push_back(transition.target.clone());
                }
            }
        }
        reached
    }

    fn validate(
        &self,
        path: &str,
        check: &dyn Fn(&Expression) -> Result<(), ExpressionError>,
    ) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidDefinition(format!("{}: {}", path, reason));

        if self.nodes.is_empty() {
            return Err(invalid("container has no flow nodes".to_string()));
        }

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(&node.id) {
                return Err(invalid(format!("duplicate flow node id '{}'", node.id)));
            }
        }

        let mut transition_ids = HashSet::new();
        for transition in &self.transitions {
            if !transition_ids.insert(&transition.id) {
                return Err(invalid(format!("duplicate transition id '{}'", transition.id)));
            }
            for end in [&transition.source, &transition.target] {
                if !node_ids.contains(end) {
                    return Err(invalid(format!(
                        "transition '{}' references unknown flow node '{}'",
                        transition.id, end
                    )));
                }
            }
            if let Some(condition) = &transition.condition {
                check(condition).map_err(|e| {
                    invalid(format!("condition of transition '{}': {}", transition.id, e))
                })?;
            }
        }

        if self.start_nodes().is_empty() {
            return Err(invalid("container has no start node".to_string()));
        }

        let mut data_names = HashSet::new();
        for data in &self.data {
            if !data_names.insert(data.name.as_str()) {
                return Err(invalid(format!("duplicate data definition '{}'", data.name)));
            }
            if let Some(default) = &data.default_value {
                check(default)
                    .map_err(|e| invalid(format!("default value of '{}': {}", data.name, e)))?;
            }
        }

        for node in &self.nodes {
            if let Some(default) = &node.default_transition {
                let outgoing = self.outgoing(&node.id);
                if !outgoing.iter().any(|t| &t.id == default) {
                    return Err(invalid(format!(
                        "default transition '{}' is not an outgoing transition of '{}'",
                        default, node.id
                    )));
                }
            }
            for (name, input) in &node.inputs {
                check(input)
                    .map_err(|e| invalid(format!("input '{}' of '{}': {}", name, node.id, e)))?;
            }
            for output in &node.outputs {
                check(&output.expression).map_err(|e| {
                    invalid(format!("output '{}' of '{}': {}", output.variable, node.id, e))
                })?;
            }
            if let FlowNodeKind::SubProcess { container } = &node.kind {
                container.validate(&format!("{}/{}", path, node.id), check)?;
            }
        }

        Ok(())
    }
}

/// Actor declared by a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDefinition {
    /// Actor name
    pub name: String,
    /// Whether the actor may start instances
    #[serde(default)]
    pub initiator: bool,
}

/// Parameter declared by a definition, valued at deployment time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub return_type: ReturnType,
    /// Deployed value; unset parameters leave the definition unresolved
    #[serde(default)]
    pub value: Option<Value>,
}

/// One classification label slot, set from a constant or an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringIndexDefinition {
    /// Slot, 1-based
    pub index: usize,
    /// Label of the slot
    pub label: String,
    /// Value evaluated once at start
    #[serde(default)]
    pub value: Option<Expression>,
}

/// Aggregate: Process definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Unique identifier
    pub id: ProcessDefinitionId,
    /// Name
    pub name: String,
    /// Version
    pub version: String,
    /// Top level graph
    pub container: FlowContainerDefinition,
    /// Actors
    #[serde(default)]
    pub actors: Vec<ActorDefinition>,
    /// Parameters
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    /// Classification labels
    #[serde(default)]
    pub string_indexes: Vec<StringIndexDefinition>,
}

impl ProcessDefinition {
    /// Parse a definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, CoreError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Structural validation; `check` validates every embedded expression
    pub fn validate(
        &self,
        check: &dyn Fn(&Expression) -> Result<(), ExpressionError>,
    ) -> Result<(), CoreError> {
        if self.id.0.trim().is_empty() {
            return Err(CoreError::InvalidDefinition("definition id is empty".to_string()));
        }

        self.container.validate(&self.id.0, check)?;

        let mut slots = HashSet::new();
        for index in &self.string_indexes {
            if index.index == 0 || index.index > STRING_INDEX_SLOTS {
                return Err(CoreError::InvalidDefinition(format!(
                    "string index {} is outside 1..={}",
                    index.index, STRING_INDEX_SLOTS
                )));
            }
            if !slots.insert(index.index) {
                return Err(CoreError::InvalidDefinition(format!(
                    "string index {} is defined twice",
                    index.index
                )));
            }
            if let Some(value) = &index.value {
                check(value).map_err(|e| {
                    CoreError::InvalidDefinition(format!("string index {}: {}", index.index, e))
                })?;
            }
        }

        let mut parameters = HashSet::new();
        for parameter in &self.parameters {
            if !parameters.insert(parameter.name.as_str()) {
                return Err(CoreError::InvalidDefinition(format!(
                    "parameter '{}' is defined twice",
                    parameter.name
                )));
            }
        }

        Ok(())
    }

    /// Deployed parameter values
    pub fn parameter_values(&self) -> std::collections::HashMap<String, Value> {
        self.parameters
            .iter()
            .filter_map(|p| p.value.clone().map(|v| (p.name.clone(), v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_check(_: &Expression) -> Result<(), ExpressionError> {
        Ok(())
    }

    const FORK_JOIN: &str = r#"
id: order
name: Order
version: "1.0"
container:
  nodes:
    - id: start
      type: start_event
    - id: fork
      type: gateway
      gateway: parallel
    - id: pack
      type: human_task
      actor: clerk
    - id: bill
      type: automatic_task
    - id: join
      type: gateway
      gateway: parallel
    - id: end
      type: end_event
  transitions:
    - { id: t1, source: start, target: fork }
    - { id: t2, source: fork, target: pack }
    - { id: t3, source: fork, target: bill }
    - { id: t4, source: pack, target: join }
    - { id: t5, source: bill, target: join }
    - { id: t6, source: join, target: end }
actors:
  - name: clerk
"#;

    #[test]
    fn test_from_yaml() {
        let definition = ProcessDefinition::from_yaml(FORK_JOIN).unwrap();
        assert_eq!(definition.id.0, "order");

        let container = &definition.container;
        assert_eq!(container.nodes.len(), 6);
        assert_eq!(
            container.node(&NodeId("fork".into())).unwrap().kind,
            FlowNodeKind::Gateway {
                gateway: GatewayKind::Parallel
            }
        );
        assert_eq!(container.start_nodes()[0].id, NodeId("start".into()));
        assert!(container.is_join(&NodeId("join".into())));
        assert!(!container.is_join(&NodeId("fork".into())));

        definition.validate(&no_check).unwrap();
    }

    #[test]
    fn test_reachability_stops_at_blocked_node() {
        let definition = ProcessDefinition::from_yaml(FORK_JOIN).unwrap();
        let reached = definition
            .container
            .reachable_transitions(&NodeId("pack".into()), &NodeId("join".into()));

        assert!(reached.contains(&TransitionId("t4".into())));
        assert!(!reached.contains(&TransitionId("t6".into())));
        assert!(!reached.contains(&TransitionId("t5".into())));
    }

    #[test]
    fn test_validation_failures() {
        let base = ProcessDefinition::from_yaml(FORK_JOIN).unwrap();

        let mut duplicate = base.clone();
        duplicate.container.nodes.push(FlowNodeDefinition::new("pack", FlowNodeKind::AutomaticTask));
        assert!(matches!(
            duplicate.validate(&no_check),
            Err(CoreError::InvalidDefinition(_))
        ));

        let mut dangling = base.clone();
        dangling.container.transitions.push(TransitionDefinition {
            id: TransitionId("t7".into()),
            source: NodeId("end".into()),
            target: NodeId("nowhere".into()),
            condition: None,
        });
        assert!(dangling.validate(&no_check).is_err());

        let mut bad_default = base.clone();
        bad_default.container.nodes[1].default_transition = Some(TransitionId("t6".into()));
        assert!(bad_default.validate(&no_check).is_err());

        let mut cyclic = base.clone();
        cyclic.container.transitions.push(TransitionDefinition {
            id: TransitionId("t0".into()),
            source: NodeId("end".into()),
            target: NodeId("start".into()),
            condition: None,
        });
        // every node now has an incoming transition
        assert!(cyclic.validate(&no_check).is_err());

        let mut empty = base.clone();
        empty.container = FlowContainerDefinition::default();
        assert!(empty.validate(&no_check).is_err());

        let mut slots = base;
        slots.string_indexes.push(StringIndexDefinition {
            index: 6,
            label: "region".into(),
            value: None,
        });
        assert!(slots.validate(&no_check).is_err());
    }

    #[test]
    fn test_expressions_are_checked() {
        let mut definition = ProcessDefinition::from_yaml(FORK_JOIN).unwrap();
        definition.container.transitions[1].condition =
            Some(Expression::constant("", ReturnType::Boolean));

        let reject = |e: &Expression| -> Result<(), ExpressionError> {
            if e.content().is_empty() {
                Err(ExpressionError::invalid(e, "empty"))
            } else {
                Ok(())
            }
        };
        assert!(definition.validate(&reject).is_err());
    }
}
