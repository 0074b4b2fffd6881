//! Assertions over process instance and flow node snapshots.

use conflux_core::{FlowNodeInstance, FlowNodeState, ProcessInstance, ProcessInstanceState};
use thiserror::Error;

/// Error type for state validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssertionError {
    #[error("Invalid process instance state: expected {expected}, got {actual}")]
    InstanceState { expected: String, actual: String },

    #[error("Flow node {node} is still live in state {state}")]
    LiveNode { node: String, state: String },

    #[error("Flow node {node}: expected {expected}, got {actual}")]
    NodeState {
        node: String,
        expected: String,
        actual: String,
    },

    #[error("Flow node {0} was never created")]
    MissingNode(String),
}

/// Asserts that a process instance is in the expected state.
pub fn assert_instance_state(
    instance: &ProcessInstance,
    expected: ProcessInstanceState,
) -> Result<(), AssertionError> {
    if instance.state != expected {
        return Err(AssertionError::InstanceState {
            expected: expected.to_string(),
            actual: instance.state.to_string(),
        });
    }
    Ok(())
}

/// Asserts that every flow node reached COMPLETED, SKIPPED or ABORTED.
pub fn assert_no_live_nodes(nodes: &[FlowNodeInstance]) -> Result<(), AssertionError> {
    match nodes.iter().find(|n| n.is_live()) {
        Some(node) => Err(AssertionError::LiveNode {
            node: node.node_id.to_string(),
            state: node.state.to_string(),
        }),
        None => Ok(()),
    }
}

/// Asserts the state of the latest instance of each named definition node.
///
/// # Arguments
///
/// * `nodes` - Flow node instances in creation order
/// * `expected` - Definition node ids paired with their expected state
pub fn assert_node_states(
    nodes: &[FlowNodeInstance],
    expected: &[(&str, FlowNodeState)],
) -> Result<(), AssertionError> {
    for (node_id, state) in expected {
        let node = nodes
            .iter()
            .rev()
            .find(|n| n.node_id.0 == *node_id)
            .ok_or_else(|| AssertionError::MissingNode(node_id.to_string()))?;
        if node.state != *state {
            return Err(AssertionError::NodeState {
                node: node_id.to_string(),
                expected: state.to_string(),
                actual: node.state.to_string(),
            });
        }
    }
    Ok(())
}
