use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt::Debug;

use super::flow_node::{FlowNodeInstanceId, FlowNodeState, FlowNodeType};
use super::process_definition::{NodeId, TransitionId};
use super::process_instance::{ProcessInstanceId, ProcessInstanceState};

/// Domain event trait for all events in the system
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the process instance ID this event is associated with
    fn process_instance_id(&self) -> &ProcessInstanceId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;

    /// Downcast support for observers
    fn as_any(&self) -> &dyn Any;
}

/// Event: Flow node changed state
#[derive(Debug, Clone)]
pub struct FlowNodeStateChanged {
    /// The process instance the flow node belongs to
    pub process_instance_id: ProcessInstanceId,

    /// The flow node instance
    pub flow_node_id: FlowNodeInstanceId,

    /// The definition node
    pub node_id: NodeId,

    /// The flow node type
    pub node_type: FlowNodeType,

    /// State before the change, `None` on creation
    pub old_state: Option<FlowNodeState>,

    /// State after the change
    pub new_state: FlowNodeState,

    /// The timestamp of the change
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for FlowNodeStateChanged {
    fn event_type(&self) -> &'static str {
        "flow_node.state_changed"
    }

    fn process_instance_id(&self) -> &ProcessInstanceId {
        &self.process_instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Event: Process instance changed state
#[derive(Debug, Clone)]
pub struct ProcessInstanceStateChanged {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// State before the change, `None` on creation
    pub old_state: Option<ProcessInstanceState>,

    /// State after the change
    pub new_state: ProcessInstanceState,

    /// The timestamp of the change
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for ProcessInstanceStateChanged {
    fn event_type(&self) -> &'static str {
        "process_instance.state_changed"
    }

    fn process_instance_id(&self) -> &ProcessInstanceId {
        &self.process_instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Event: A join gateway fired
#[derive(Debug, Clone)]
pub struct GatewayFired {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// The gateway's flow node instance
    pub flow_node_id: FlowNodeInstanceId,

    /// The gateway definition node
    pub node_id: NodeId,

    /// Activation epoch of the gateway instance
    pub epoch: u32,

    /// Incoming transitions that delivered a token
    pub arrived: Vec<TransitionId>,

    /// The timestamp of the firing
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for GatewayFired {
    fn event_type(&self) -> &'static str {
        "gateway.fired"
    }

    fn process_instance_id(&self) -> &ProcessInstanceId {
        &self.process_instance_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
