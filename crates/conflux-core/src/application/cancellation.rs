//! Abort propagation through a container's live flow nodes.

use tracing::{debug, warn};

use super::runtime::Transaction;
use crate::domain::flow_node::{FlowNodeInstanceId, FlowNodeState, FlowNodeType, ParentContainer};
use crate::CoreError;

/// Abort every live flow node of a container, depth-first, except `keep`.
///
/// Unfired join gateways of the container are discarded first. A failure to
/// abort one node is logged and does not stop the others.
pub(crate) fn abort_container(
    tx: &mut Transaction,
    container: &ParentContainer,
    keep: Option<&FlowNodeInstanceId>,
) {
    let discarded = tx.gateways_mut().discard_container(container.id());
    if !discarded.is_empty() {
        debug!(
            container = container.id(),
            gateways = discarded.len(),
            "Discarded unfired gateways"
        );
    }

    let targets: Vec<FlowNodeInstanceId> = tx
        .live_nodes(container.id())
        .into_iter()
        .map(|n| n.id.clone())
        .filter(|id| Some(id) != keep)
        .collect();

    for id in targets {
        if let Err(e) = abort_node(tx, &id) {
            warn!(
                container = container.id(),
                flow_node_id = %id,
                error = %e,
                "Failed to abort flow node, continuing with siblings"
            );
        }
    }
}

/// Abort one flow node and everything below it.
///
/// A COMPLETING node already committed to its completion; it is only flagged
/// so that the successors it creates are aborted. A sub-process whose child
/// container still has such a node stays EXECUTING, flagged, until the child
/// container drains.
pub(crate) fn abort_node(tx: &mut Transaction, id: &FlowNodeInstanceId) -> Result<(), CoreError> {
    let node = tx.node(id)?;
    if !node.is_live() {
        return Ok(());
    }
    let state = node.state;
    let node_type = node.node_type;

    if state == FlowNodeState::Completing {
        tx.node_mut(id)?.interrupt_requested = true;
        debug!(flow_node_id = %id, "Abort requested while completing");
        return Ok(());
    }

    if node_type == FlowNodeType::SubProcess {
        let child = ParentContainer::Activity(id.clone());
        abort_container(tx, &child, None);
        if !tx.live_nodes(child.id()).is_empty() {
            tx.node_mut(id)?.interrupt_requested = true;
            return Ok(());
        }
    }

    if state == FlowNodeState::Waiting {
        tx.gateways_mut().discard_flow_node(id);
    }

    tx.transition_node(id, FlowNodeState::Aborting)?;
    tx.transition_node(id, FlowNodeState::Aborted)?;
    Ok(())
}
