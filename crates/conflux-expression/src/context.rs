//! Evaluation inputs and the per-call resolved-expression cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::expression::Expression;
use crate::value::Value;

/// Kind of container an evaluation is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerType {
    /// A process instance scope
    ProcessInstance,
    /// A flow node instance scope
    FlowNodeInstance,
}

/// Identifies the container an evaluation is made for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerContext {
    /// Container kind
    pub container_type: ContainerType,
    /// Process instance or flow node instance id
    pub container_id: String,
}

impl ContainerContext {
    /// Create a container context
    pub fn new(container_type: ContainerType, container_id: impl Into<String>) -> Self {
        Self {
            container_type,
            container_id: container_id.into(),
        }
    }
}

impl fmt::Display for ContainerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.container_type {
            ContainerType::ProcessInstance => write!(f, "process instance {}", self.container_id),
            ContainerType::FlowNodeInstance => write!(f, "flow node instance {}", self.container_id),
        }
    }
}

/// Values the engine exposes to `EngineConstant` expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineConstant {
    /// Id of the process instance being evaluated
    ProcessInstanceId,
    /// Id of the outermost process instance
    RootProcessInstanceId,
    /// Id of the flow node instance being evaluated
    FlowNodeInstanceId,
    /// Id of the process definition
    ProcessDefinitionId,
    /// Actor the flow node is executed by
    ExecutedBy,
}

impl EngineConstant {
    /// Name used in expression content
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineConstant::ProcessInstanceId => "processInstanceId",
            EngineConstant::RootProcessInstanceId => "rootProcessInstanceId",
            EngineConstant::FlowNodeInstanceId => "flowNodeInstanceId",
            EngineConstant::ProcessDefinitionId => "processDefinitionId",
            EngineConstant::ExecutedBy => "executedBy",
        }
    }
}

impl FromStr for EngineConstant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processInstanceId" => Ok(EngineConstant::ProcessInstanceId),
            "rootProcessInstanceId" => Ok(EngineConstant::RootProcessInstanceId),
            "flowNodeInstanceId" | "activityInstanceId" => Ok(EngineConstant::FlowNodeInstanceId),
            "processDefinitionId" => Ok(EngineConstant::ProcessDefinitionId),
            "executedBy" => Ok(EngineConstant::ExecutedBy),
            other => Err(format!("Unknown engine constant: {}", other)),
        }
    }
}

/// Dependency values an evaluation can draw from.
///
/// The caller snapshots these from the process and activity data scopes
/// before evaluating, so evaluation never touches live instance state.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    values: HashMap<String, Value>,
    parameters: HashMap<String, Value>,
    engine_constants: HashMap<EngineConstant, Value>,
    container: Option<ContainerContext>,
    definition_id: Option<String>,
}

impl EvaluationContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Context over the given variable values
    pub fn with_values(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    /// Add one variable value
    pub fn value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Replace the definition parameters
    pub fn parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add one engine constant
    pub fn engine_constant(mut self, constant: EngineConstant, value: Value) -> Self {
        self.engine_constants.insert(constant, value);
        self
    }

    /// Set the container errors are attributed to
    pub fn container(mut self, container: ContainerContext) -> Self {
        self.container = Some(container);
        self
    }

    /// Set the definition whose script shell should be used
    pub fn definition(mut self, definition_id: impl Into<String>) -> Self {
        self.definition_id = Some(definition_id.into());
        self
    }

    /// Look up a variable value
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Look up a definition parameter
    pub fn get_parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Look up an engine constant
    pub fn get_engine_constant(&self, constant: EngineConstant) -> Option<&Value> {
        self.engine_constants.get(&constant)
    }

    /// All variable values
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Container errors are attributed to
    pub fn container_context(&self) -> Option<&ContainerContext> {
        self.container.as_ref()
    }

    /// Owning definition, if any
    pub fn definition_id(&self) -> Option<&str> {
        self.definition_id.as_deref()
    }
}

/// Values already computed during one evaluation call, keyed by discriminant
#[derive(Debug, Clone, Default)]
pub struct ResolvedExpressions(HashMap<u64, Value>);

impl ResolvedExpressions {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of an already evaluated expression
    pub fn get(&self, expression: &Expression) -> Option<&Value> {
        self.0.get(&expression.discriminant())
    }

    /// Record the value of an evaluated expression
    pub fn insert(&mut self, expression: &Expression, value: Value) {
        self.0.insert(expression.discriminant(), value);
    }

    /// Whether the expression has already been evaluated
    pub fn contains(&self, expression: &Expression) -> bool {
        self.0.contains_key(&expression.discriminant())
    }

    /// Number of resolved expressions
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing has been resolved yet
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
