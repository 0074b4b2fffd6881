use conflux_expression::ExpressionError;
use thiserror::Error;

use crate::domain::repository::ResolutionProblem;

/// Core error type for the Conflux engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The definition has unset parameters, connectors or actors
    #[error("Process definition is not resolved: {}", describe_problems(.0))]
    DefinitionUnresolved(Vec<ResolutionProblem>),

    /// Operation attempted on a flow node in the wrong state
    #[error("Flow node {flow_node_id} cannot {operation} in state {state}")]
    FlowNodeState {
        /// Flow node instance id
        flow_node_id: String,
        /// Current state of the flow node
        state: String,
        /// Operation that was refused
        operation: String,
    },

    /// Operation attempted on a process instance in the wrong state
    #[error("Process instance {process_instance_id} cannot {operation} in state {state}")]
    ProcessInstanceState {
        /// Process instance id
        process_instance_id: String,
        /// Current state of the process instance
        state: String,
        /// Operation that was refused
        operation: String,
    },

    /// A second arrival raced a gateway that already fired
    #[error("Gateway already fired: {0}")]
    GatewayAlreadyFired(String),

    /// An expression referenced a value that was not supplied
    #[error("Dependency missing: {0}")]
    DependencyMissing(String),

    /// An expression could not be evaluated
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// An expression is structurally invalid
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// The persistence collaborator failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Process definition not found
    #[error("Process definition not found: {0}")]
    ProcessDefinitionNotFound(String),

    /// Process instance not found
    #[error("Process instance not found: {0}")]
    ProcessInstanceNotFound(String),

    /// Flow node instance not found
    #[error("Flow node instance not found: {0}")]
    FlowNodeNotFound(String),

    /// Definition failed validation
    #[error("Invalid process definition: {0}")]
    InvalidDefinition(String),

    /// The work dispatcher refused a work item
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn describe_problems(problems: &[ResolutionProblem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// Whether this is an expression-layer failure that should fail the flow node
    pub fn is_expression_failure(&self) -> bool {
        matches!(
            self,
            CoreError::DependencyMissing(_) | CoreError::Evaluation(_) | CoreError::InvalidExpression(_)
        )
    }
}

impl From<ExpressionError> for CoreError {
    fn from(err: ExpressionError) -> Self {
        match err {
            ExpressionError::InvalidExpression { .. } | ExpressionError::UnsupportedKind(_) => {
                CoreError::InvalidExpression(err.to_string())
            }
            ExpressionError::DependencyMissing { .. } => CoreError::DependencyMissing(err.to_string()),
            ExpressionError::Evaluation { .. } => CoreError::Evaluation(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
