use conflux_core::{
    DataDefinition, FlowContainerDefinition, FlowNodeDefinition, FlowNodeKind, GatewayKind, NodeId,
    Operation, ProcessDefinition, ProcessDefinitionId, TransitionDefinition, TransitionId,
};
use conflux_core::domain::process_definition::{
    ActorDefinition, ParameterDefinition, StringIndexDefinition,
};
use conflux_expression::{Expression, ReturnType, Value};

/// Fluent builder for one flow container (process body or sub-process)
#[derive(Debug, Clone, Default)]
pub struct ContainerBuilder {
    container: FlowContainerDefinition,
}

impl ContainerBuilder {
    /// Empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node of any kind
    pub fn node(mut self, id: &str, kind: FlowNodeKind) -> Self {
        self.container.nodes.push(FlowNodeDefinition::new(id, kind));
        self
    }

    /// Add a start event
    pub fn start(self, id: &str) -> Self {
        self.node(id, FlowNodeKind::StartEvent)
    }

    /// Add an end event
    pub fn end(self, id: &str) -> Self {
        self.node(id, FlowNodeKind::EndEvent)
    }

    /// Add a terminate end event
    pub fn terminate_end(self, id: &str) -> Self {
        self.node(id, FlowNodeKind::TerminateEndEvent)
    }

    /// Add an automatic task
    pub fn task(self, id: &str) -> Self {
        self.node(id, FlowNodeKind::AutomaticTask)
    }

    /// Add a human task that waits for an explicit completion
    pub fn human_task(self, id: &str) -> Self {
        self.node(id, FlowNodeKind::HumanTask)
    }

    /// Add an intermediate catch event
    pub fn catch_event(self, id: &str) -> Self {
        self.node(id, FlowNodeKind::IntermediateCatchEvent)
    }

    /// Add a gateway
    pub fn gateway(self, id: &str, gateway: GatewayKind) -> Self {
        self.node(id, FlowNodeKind::Gateway { gateway })
    }

    /// Add an embedded sub-process
    pub fn sub_process(self, id: &str, body: ContainerBuilder) -> Self {
        self.node(
            id,
            FlowNodeKind::SubProcess {
                container: body.build(),
            },
        )
    }

    /// Connect two nodes
    pub fn transition(mut self, id: &str, source: &str, target: &str) -> Self {
        self.container.transitions.push(TransitionDefinition {
            id: TransitionId(id.to_string()),
            source: NodeId(source.to_string()),
            target: NodeId(target.to_string()),
            condition: None,
        });
        self
    }

    /// Connect two nodes behind a guard
    pub fn guarded(mut self, id: &str, source: &str, target: &str, condition: Expression) -> Self {
        self.container.transitions.push(TransitionDefinition {
            id: TransitionId(id.to_string()),
            source: NodeId(source.to_string()),
            target: NodeId(target.to_string()),
            condition: Some(condition),
        });
        self
    }

    /// Make `transition` the default of `node`
    pub fn default_transition(mut self, node: &str, transition: &str) -> Self {
        if let Some(definition) = self.node_mut(node) {
            definition.default_transition = Some(TransitionId(transition.to_string()));
        }
        self
    }

    /// Declare a variable of this container's scope
    pub fn data(mut self, name: &str, return_type: ReturnType, default_value: Option<Expression>) -> Self {
        self.container.data.push(DataDefinition {
            name: name.to_string(),
            return_type,
            default_value,
        });
        self
    }

    /// Add an input to `node`
    pub fn input(mut self, node: &str, name: &str, expression: Expression) -> Self {
        if let Some(definition) = self.node_mut(node) {
            definition.inputs.insert(name.to_string(), expression);
        }
        self
    }

    /// Add an output assignment to `node`
    pub fn output(mut self, node: &str, variable: &str, expression: Expression) -> Self {
        if let Some(definition) = self.node_mut(node) {
            definition.outputs.push(Operation {
                variable: variable.to_string(),
                expression,
            });
        }
        self
    }

    /// Set the actor of a human task
    pub fn actor(mut self, node: &str, actor: &str) -> Self {
        if let Some(definition) = self.node_mut(node) {
            definition.actor = Some(actor.to_string());
        }
        self
    }

    /// Require a connector for `node`
    pub fn connector(mut self, node: &str, connector: &str) -> Self {
        if let Some(definition) = self.node_mut(node) {
            definition.connector = Some(connector.to_string());
        }
        self
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut FlowNodeDefinition> {
        self.container.nodes.iter_mut().find(|n| n.id.0 == id)
    }

    /// Finished container
    pub fn build(self) -> FlowContainerDefinition {
        self.container
    }
}

/// Fluent builder for a process definition
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    definition: ProcessDefinition,
}

impl DefinitionBuilder {
    /// Definition with an empty body
    pub fn new(id: &str) -> Self {
        Self {
            definition: ProcessDefinition {
                id: ProcessDefinitionId(id.to_string()),
                name: id.to_string(),
                version: "1.0".to_string(),
                container: FlowContainerDefinition::default(),
                actors: Vec::new(),
                parameters: Vec::new(),
                string_indexes: Vec::new(),
            },
        }
    }

    /// Set the version
    pub fn version(mut self, version: &str) -> Self {
        self.definition.version = version.to_string();
        self
    }

    /// Set the process body
    pub fn body(mut self, body: ContainerBuilder) -> Self {
        self.definition.container = body.build();
        self
    }

    /// Declare an actor
    pub fn actor(mut self, name: &str) -> Self {
        self.definition.actors.push(ActorDefinition {
            name: name.to_string(),
            initiator: false,
        });
        self
    }

    /// Declare a parameter, unset when `value` is `None`
    pub fn parameter(mut self, name: &str, return_type: ReturnType, value: Option<Value>) -> Self {
        self.definition.parameters.push(ParameterDefinition {
            name: name.to_string(),
            return_type,
            value,
        });
        self
    }

    /// Declare a classification label
    pub fn string_index(mut self, index: usize, label: &str, value: Option<Expression>) -> Self {
        self.definition.string_indexes.push(StringIndexDefinition {
            index,
            label: label.to_string(),
            value,
        });
        self
    }

    /// Finished definition
    pub fn build(self) -> ProcessDefinition {
        self.definition
    }
}
