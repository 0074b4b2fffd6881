use serde::{Deserialize, Serialize};

use super::flow_node::FlowNodeInstanceId;
use super::process_instance::ProcessInstanceId;

/// Unit of work scheduled through the work dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItem {
    /// Run a READY flow node
    ExecuteFlowNode {
        /// Owning process instance
        process_instance_id: ProcessInstanceId,
        /// Flow node to run
        flow_node_id: FlowNodeInstanceId,
    },
    /// Complete a sub-process activity whose child container finished
    CompleteSubProcess {
        /// Owning process instance
        process_instance_id: ProcessInstanceId,
        /// Sub-process activity
        flow_node_id: FlowNodeInstanceId,
    },
}

impl WorkItem {
    /// Process instance the work belongs to
    pub fn process_instance_id(&self) -> &ProcessInstanceId {
        match self {
            WorkItem::ExecuteFlowNode {
                process_instance_id,
                ..
            }
            | WorkItem::CompleteSubProcess {
                process_instance_id,
                ..
            } => process_instance_id,
        }
    }

    /// Flow node the work targets
    pub fn flow_node_id(&self) -> &FlowNodeInstanceId {
        match self {
            WorkItem::ExecuteFlowNode { flow_node_id, .. }
            | WorkItem::CompleteSubProcess { flow_node_id, .. } => flow_node_id,
        }
    }
}
