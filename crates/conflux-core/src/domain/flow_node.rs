use chrono::{DateTime, Utc};
use conflux_expression::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use super::process_definition::{FlowNodeKind, NodeId, TransitionId};
use super::process_instance::ProcessInstanceId;
use crate::CoreError;

/// Value object: Flow node instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowNodeInstanceId(pub String);

impl FlowNodeInstanceId {
    /// Fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for FlowNodeInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flow node lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowNodeState {
    /// Created, waiting to be executed
    Ready,
    /// Join gateway holding tokens until it may fire
    Waiting,
    /// Running; inputs are evaluated
    Executing,
    /// Completion claimed, outputs and guards being evaluated
    Completing,
    /// Done
    Completed,
    /// Bypassed by an operator
    Skipped,
    /// Failed; may be retried, skipped or aborted
    Failed,
    /// Being aborted
    Aborting,
    /// Aborted
    Aborted,
}

impl FlowNodeState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowNodeState::Completed | FlowNodeState::Skipped | FlowNodeState::Aborted
        )
    }

    /// Whether the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: FlowNodeState) -> bool {
        use FlowNodeState::*;
        matches!(
            (self, next),
            (Ready, Executing)
                | (Ready, Skipped)
                | (Ready, Aborting)
                | (Waiting, Ready)
                | (Waiting, Aborting)
                | (Executing, Completing)
                | (Executing, Failed)
                | (Executing, Aborting)
                | (Completing, Completed)
                | (Completing, Failed)
                | (Failed, Ready)
                | (Failed, Skipped)
                | (Failed, Aborting)
                | (Aborting, Aborted)
        )
    }

    /// Upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowNodeState::Ready => "READY",
            FlowNodeState::Waiting => "WAITING",
            FlowNodeState::Executing => "EXECUTING",
            FlowNodeState::Completing => "COMPLETING",
            FlowNodeState::Completed => "COMPLETED",
            FlowNodeState::Skipped => "SKIPPED",
            FlowNodeState::Failed => "FAILED",
            FlowNodeState::Aborting => "ABORTING",
            FlowNodeState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for FlowNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flow node type, mirrors the definition kind without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowNodeType {
    /// Start event
    StartEvent,
    /// End event
    EndEvent,
    /// Terminate end event
    TerminateEndEvent,
    /// Automatic task
    AutomaticTask,
    /// Human task
    HumanTask,
    /// Intermediate catch event
    IntermediateCatchEvent,
    /// Gateway
    Gateway,
    /// Embedded sub-process
    SubProcess,
}

impl From<&FlowNodeKind> for FlowNodeType {
    fn from(kind: &FlowNodeKind) -> Self {
        match kind {
            FlowNodeKind::StartEvent => FlowNodeType::StartEvent,
            FlowNodeKind::EndEvent => FlowNodeType::EndEvent,
            FlowNodeKind::TerminateEndEvent => FlowNodeType::TerminateEndEvent,
            FlowNodeKind::AutomaticTask => FlowNodeType::AutomaticTask,
            FlowNodeKind::HumanTask => FlowNodeType::HumanTask,
            FlowNodeKind::IntermediateCatchEvent => FlowNodeType::IntermediateCatchEvent,
            FlowNodeKind::Gateway { .. } => FlowNodeType::Gateway,
            FlowNodeKind::SubProcess { .. } => FlowNodeType::SubProcess,
        }
    }
}

/// Owner of a flow node instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentContainer {
    /// Top level of a process instance
    ProcessInstance(ProcessInstanceId),
    /// Child container of a sub-process activity
    Activity(FlowNodeInstanceId),
}

impl ParentContainer {
    /// Container id, used as the work dispatcher key and variable scope id
    pub fn id(&self) -> &str {
        match self {
            ParentContainer::ProcessInstance(id) => &id.0,
            ParentContainer::Activity(id) => &id.0,
        }
    }
}

/// Branches an inclusive fork activated, carried on the tokens it emits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Activation {
    /// Fork node
    pub fork_node: NodeId,
    /// Fork flow node instance
    pub fork_instance: FlowNodeInstanceId,
    /// Outgoing transitions the fork took
    pub activated: BTreeSet<TransitionId>,
}

/// Entity: one instantiated flow node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNodeInstance {
    /// Unique identifier
    pub id: FlowNodeInstanceId,
    /// Definition node
    pub node_id: NodeId,
    /// Display name
    pub name: String,
    /// Node type
    pub node_type: FlowNodeType,
    /// Owning process instance
    pub process_instance_id: ProcessInstanceId,
    /// Owning container
    pub parent: ParentContainer,
    /// Current state
    pub state: FlowNodeState,
    /// When the current state was reached
    pub reached_state_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Creation order inside the process instance
    pub sequence: u64,
    /// Actor that completed the node
    pub executed_by: Option<String>,
    /// Transition the token arrived on
    pub incoming: Option<TransitionId>,
    /// Inputs evaluated on entering EXECUTING
    pub inputs: BTreeMap<String, Value>,
    /// Inclusive fork activations the token carries, innermost last
    pub activations: Vec<Activation>,
    /// Abort was requested while the node was completing
    pub interrupt_requested: bool,
    /// Reason of the last failure
    pub failure: Option<String>,
}

impl FlowNodeInstance {
    /// Create a flow node instance in the given initial state
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        name: String,
        node_type: FlowNodeType,
        process_instance_id: ProcessInstanceId,
        parent: ParentContainer,
        state: FlowNodeState,
        sequence: u64,
        incoming: Option<TransitionId>,
        activations: Vec<Activation>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: FlowNodeInstanceId::generate(),
            node_id,
            name,
            node_type,
            process_instance_id,
            parent,
            state,
            reached_state_at: now,
            created_at: now,
            sequence,
            executed_by: None,
            incoming,
            inputs: BTreeMap::new(),
            activations,
            interrupt_requested: false,
            failure: None,
        }
    }

    /// Move to `next`, returning the previous state
    pub fn transition_to(&mut self, next: FlowNodeState) -> Result<FlowNodeState, CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(self.state_error(&format!("move to {}", next)));
        }
        let previous = self.state;
        self.state = next;
        self.reached_state_at = Utc::now();
        Ok(previous)
    }

    /// Error for an operation refused in the current state
    pub fn state_error(&self, operation: &str) -> CoreError {
        CoreError::FlowNodeState {
            flow_node_id: self.id.0.clone(),
            state: self.state.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Whether the node still takes part in the flow
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(state: FlowNodeState) -> FlowNodeInstance {
        let process_instance_id = ProcessInstanceId("p-1".into());
        FlowNodeInstance::new(
            NodeId("step1".into()),
            "Step 1".into(),
            FlowNodeType::HumanTask,
            process_instance_id.clone(),
            ParentContainer::ProcessInstance(process_instance_id),
            state,
            0,
            None,
            Vec::new(),
        )
    }

    #[test]
    fn test_happy_path() {
        let mut instance = node(FlowNodeState::Ready);
        assert_eq!(instance.transition_to(FlowNodeState::Executing), Ok(FlowNodeState::Ready));
        assert_eq!(
            instance.transition_to(FlowNodeState::Completing),
            Ok(FlowNodeState::Executing)
        );
        assert_eq!(
            instance.transition_to(FlowNodeState::Completed),
            Ok(FlowNodeState::Completing)
        );
        assert!(!instance.is_live());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for state in [FlowNodeState::Completed, FlowNodeState::Skipped, FlowNodeState::Aborted] {
            let mut instance = node(state);
            assert!(matches!(
                instance.transition_to(FlowNodeState::Aborting),
                Err(CoreError::FlowNodeState { .. })
            ));
        }
    }

    #[test]
    fn test_failed_is_recoverable() {
        let mut instance = node(FlowNodeState::Failed);
        assert!(instance.is_live());
        assert!(instance.transition_to(FlowNodeState::Ready).is_ok());

        let mut instance = node(FlowNodeState::Failed);
        assert!(instance.transition_to(FlowNodeState::Skipped).is_ok());
    }

    #[test]
    fn test_completing_cannot_abort() {
        let mut instance = node(FlowNodeState::Completing);
        assert!(instance.transition_to(FlowNodeState::Aborting).is_err());
    }

    #[test]
    fn test_state_error_message() {
        let instance = node(FlowNodeState::Aborted);
        assert_eq!(
            instance.state_error("complete").to_string(),
            format!("Flow node {} cannot complete in state ABORTED", instance.id)
        );
    }
}
