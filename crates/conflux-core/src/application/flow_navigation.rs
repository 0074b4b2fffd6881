//! Token movement: successor creation, join synchronization and container
//! completion.

use chrono::Utc;
use conflux_expression::{ExpressionEvaluator, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cancellation::{abort_container, abort_node};
use super::evaluation::{evaluate_data_defaults, instance_context, node_context};
use super::runtime::Transaction;
use crate::domain::events::GatewayFired;
use crate::domain::flow_node::{
    Activation, FlowNodeInstance, FlowNodeInstanceId, FlowNodeState, FlowNodeType, ParentContainer,
};
use crate::domain::gateway::GatewayKey;
use crate::domain::process_definition::{
    FlowContainerDefinition, FlowNodeDefinition, GatewayKind, TransitionDefinition, TransitionId,
};
use crate::domain::process_instance::ProcessInstanceState;
use crate::domain::work::WorkItem;
use crate::CoreError;

/// Instantiate a definition node in a container
pub(crate) fn create_flow_node(
    tx: &mut Transaction,
    parent: &ParentContainer,
    definition: &FlowNodeDefinition,
    state: FlowNodeState,
    incoming: Option<TransitionId>,
    activations: Vec<Activation>,
) -> FlowNodeInstanceId {
    let sequence = tx.next_sequence();
    let process_instance_id = tx.instance.id.clone();
    tx.insert_node(FlowNodeInstance::new(
        definition.id.clone(),
        definition.name.clone(),
        FlowNodeType::from(&definition.kind),
        process_instance_id,
        parent.clone(),
        state,
        sequence,
        incoming,
        activations,
    ))
}

/// Initialize a container's data scope and create its start nodes
pub(crate) fn enter_container(
    tx: &mut Transaction,
    evaluator: &ExpressionEvaluator,
    container: &ParentContainer,
    supplied: &HashMap<String, Value>,
) -> Result<(), CoreError> {
    let definition = tx.container_definition(container)?.clone();

    let context = match container {
        ParentContainer::ProcessInstance(_) => {
            let values = tx.visible_variables(container);
            instance_context(tx, values)
        }
        ParentContainer::Activity(activity_id) => node_context(tx, tx.node(activity_id)?),
    };
    let values = evaluate_data_defaults(evaluator, &definition.data, context, supplied)?;
    for (name, value) in values {
        tx.write_variable(container.id(), &name, value);
    }

    let process_instance_id = tx.instance.id.clone();
    for start in definition.start_nodes() {
        let id = create_flow_node(tx, container, start, FlowNodeState::Ready, None, Vec::new());
        tx.enqueue(
            container.id(),
            WorkItem::ExecuteFlowNode {
                process_instance_id: process_instance_id.clone(),
                flow_node_id: id,
            },
        );
    }
    Ok(())
}

/// Move tokens from a finished node along the transitions it took.
///
/// With `interrupted` set every successor is created and aborted at once.
pub(crate) fn leave_node(
    tx: &mut Transaction,
    source_id: &FlowNodeInstanceId,
    taken: &[TransitionId],
    interrupted: bool,
) -> Result<(), CoreError> {
    let source = tx.node(source_id)?.clone();
    let container = tx.container_definition(&source.parent)?.clone();
    let source_definition = tx.node_definition(&source)?.clone();

    let mut activations = source.activations.clone();
    if source_definition.kind.gateway() == Some(GatewayKind::Inclusive)
        && container.outgoing(&source.node_id).len() > 1
    {
        activations.push(Activation {
            fork_node: source.node_id.clone(),
            fork_instance: source.id.clone(),
            activated: taken.iter().cloned().collect(),
        });
    }

    for transition_id in taken {
        let transition = container.transition(transition_id).ok_or_else(|| {
            CoreError::InvalidDefinition(format!("unknown transition '{}'", transition_id))
        })?;
        take_transition(
            tx,
            &container,
            &source.parent,
            transition,
            activations.clone(),
            interrupted,
        )?;
    }
    Ok(())
}

fn take_transition(
    tx: &mut Transaction,
    container: &FlowContainerDefinition,
    parent: &ParentContainer,
    transition: &TransitionDefinition,
    activations: Vec<Activation>,
    interrupted: bool,
) -> Result<(), CoreError> {
    let target = container.node(&transition.target).ok_or_else(|| {
        CoreError::InvalidDefinition(format!("unknown flow node '{}'", transition.target))
    })?;

    if interrupted {
        let id = create_flow_node(
            tx,
            parent,
            target,
            FlowNodeState::Ready,
            Some(transition.id.clone()),
            activations,
        );
        tx.transition_node(&id, FlowNodeState::Aborting)?;
        tx.transition_node(&id, FlowNodeState::Aborted)?;
        debug!(flow_node_id = %id, node = %target.id, "Successor aborted on creation");
        return Ok(());
    }

    if container.is_join(&target.id) {
        return arrive_at_join(tx, container, parent, target, transition, activations);
    }

    let id = create_flow_node(
        tx,
        parent,
        target,
        FlowNodeState::Ready,
        Some(transition.id.clone()),
        activations,
    );
    let process_instance_id = tx.instance.id.clone();
    tx.enqueue(
        parent.id(),
        WorkItem::ExecuteFlowNode {
            process_instance_id,
            flow_node_id: id,
        },
    );
    Ok(())
}

fn arrive_at_join(
    tx: &mut Transaction,
    container: &FlowContainerDefinition,
    parent: &ParentContainer,
    gateway: &FlowNodeDefinition,
    transition: &TransitionDefinition,
    activations: Vec<Activation>,
) -> Result<(), CoreError> {
    let existing = tx
        .gateways
        .find_open(parent.id(), &gateway.id, &transition.id);
    let key = match existing {
        Some(key) => key,
        None => {
            let (required, remaining) = required_arrivals(container, gateway, &activations);
            let flow_node_id = create_flow_node(
                tx,
                parent,
                gateway,
                FlowNodeState::Waiting,
                None,
                remaining.clone(),
            );
            let process_instance_id = tx.instance.id.clone();
            tx.gateways_mut().open(
                process_instance_id,
                parent.id(),
                &gateway.id,
                flow_node_id,
                required,
                remaining,
            )
        }
    };

    let satisfied = tx.gateways_mut().arrive(&key, transition.id.clone())?;
    debug!(
        gateway = %key,
        transition = %transition.id,
        satisfied,
        "Token arrived at join"
    );
    if satisfied {
        fire_gateway(tx, &key)?;
    }
    Ok(())
}

/// Incoming transitions a join waits for, plus the activations its own
/// outgoing tokens carry.
///
/// An inclusive join waits for the branches the innermost matching fork
/// activated; a parallel join, or an inclusive join without a matching fork,
/// waits for every incoming transition.
pub(crate) fn required_arrivals(
    container: &FlowContainerDefinition,
    gateway: &FlowNodeDefinition,
    activations: &[Activation],
) -> (BTreeSet<TransitionId>, Vec<Activation>) {
    let incoming: BTreeSet<TransitionId> = container
        .incoming(&gateway.id)
        .into_iter()
        .map(|t| t.id.clone())
        .collect();

    if gateway.kind.gateway() == Some(GatewayKind::Inclusive) {
        for (index, activation) in activations.iter().enumerate().rev() {
            let mut covered = HashSet::new();
            for activated in &activation.activated {
                if let Some(definition) = container.transition(activated) {
                    covered.insert(activated.clone());
                    if definition.target != gateway.id {
                        covered.extend(container.reachable_transitions(&definition.target, &gateway.id));
                    }
                }
            }
            let required: BTreeSet<TransitionId> =
                incoming.iter().filter(|t| covered.contains(*t)).cloned().collect();
            if !required.is_empty() {
                let mut remaining = activations.to_vec();
                remaining.remove(index);
                return (required, remaining);
            }
        }
    }

    (incoming, activations.to_vec())
}

/// Fire a satisfied join: its node moves WAITING → READY and is scheduled.
/// Losing a race against an earlier firing is a discard, not a failure.
pub(crate) fn fire_gateway(tx: &mut Transaction, key: &GatewayKey) -> Result<(), CoreError> {
    let record = match tx.gateways_mut().mark_fired(key) {
        Ok(record) => record.clone(),
        Err(CoreError::GatewayAlreadyFired(gateway)) => {
            warn!(gateway = %gateway, "Discarding arrival at a gateway that already fired");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    tx.transition_node(&record.flow_node_id, FlowNodeState::Ready)?;
    tx.enqueue(
        &key.container_id,
        WorkItem::ExecuteFlowNode {
            process_instance_id: record.process_instance_id.clone(),
            flow_node_id: record.flow_node_id.clone(),
        },
    );
    tx.record_event(Arc::new(GatewayFired {
        process_instance_id: record.process_instance_id.clone(),
        flow_node_id: record.flow_node_id.clone(),
        node_id: key.node_id.clone(),
        epoch: key.epoch,
        arrived: record.arrived.iter().cloned().collect(),
        timestamp: Utc::now(),
    }));
    debug!(gateway = %key, arrived = record.arrived.len(), "Gateway fired");
    Ok(())
}

/// Drop join requirements no live token can still satisfy, firing the joins
/// that become satisfied, until nothing changes.
pub(crate) fn prune_gateways(tx: &mut Transaction, container_id: &str) -> Result<(), CoreError> {
    if tx.interrupting() {
        return Ok(());
    }

    loop {
        let mut fired = false;
        let keys: Vec<GatewayKey> = tx
            .gateways
            .open_keys()
            .into_iter()
            .filter(|k| k.container_id == container_id)
            .collect();

        for key in keys {
            let record = match tx.gateways.get(&key) {
                Some(record) if record.is_open() => record.clone(),
                _ => continue,
            };
            let parent = tx.node(&record.flow_node_id)?.parent.clone();
            let container = tx.container_definition(&parent)?;
            let reachable: HashSet<TransitionId> = tx
                .live_nodes(container_id)
                .into_iter()
                .filter(|n| n.id != record.flow_node_id)
                .flat_map(|n| container.reachable_transitions(&n.node_id, &key.node_id))
                .collect();

            if tx.gateways_mut().prune(&key, |t| reachable.contains(t))? {
                debug!(gateway = %key, "Join satisfied after dropping unreachable branches");
                fire_gateway(tx, &key)?;
                fired = true;
            }
        }

        if !fired {
            return Ok(());
        }
    }
}

/// Finish a container once it has no live flow node left.
///
/// The process container completes the instance, or finalizes a cancel or
/// abort. An activity container schedules the completion of its sub-process,
/// or aborts it when an abort is pending.
pub(crate) fn check_container_completion(
    tx: &mut Transaction,
    container: &ParentContainer,
) -> Result<(), CoreError> {
    if !tx.live_nodes(container.id()).is_empty() {
        return Ok(());
    }

    match container {
        ParentContainer::ProcessInstance(_) => finish_root(tx),
        ParentContainer::Activity(activity_id) => {
            let activity = tx.node(activity_id)?;
            if activity.state != FlowNodeState::Executing {
                return Ok(());
            }
            let parent = activity.parent.clone();
            if tx.interrupting() || activity.interrupt_requested {
                tx.transition_node(activity_id, FlowNodeState::Aborting)?;
                tx.transition_node(activity_id, FlowNodeState::Aborted)?;
                return check_container_completion(tx, &parent);
            }
            let process_instance_id = tx.instance.id.clone();
            tx.enqueue(
                parent.id(),
                WorkItem::CompleteSubProcess {
                    process_instance_id,
                    flow_node_id: activity_id.clone(),
                },
            );
            Ok(())
        }
    }
}

fn finish_root(tx: &mut Transaction) -> Result<(), CoreError> {
    let id = tx.instance.id.clone();
    let state = tx.instance.state;
    match state {
        ProcessInstanceState::Started => {
            tx.transition_instance(ProcessInstanceState::Completing)?;
            tx.transition_instance(ProcessInstanceState::Completed)?;
            info!(process_instance_id = %id, "Process instance completed");
        }
        ProcessInstanceState::Cancelling => {
            tx.transition_instance(ProcessInstanceState::Cancelled)?;
            info!(process_instance_id = %id, "Process instance cancelled");
        }
        ProcessInstanceState::Aborting => {
            tx.transition_instance(ProcessInstanceState::Aborted)?;
            info!(process_instance_id = %id, "Process instance aborted");
        }
        _ => {}
    }
    Ok(())
}

/// A terminate end event ends its container: every other live node is
/// aborted and unfired joins are discarded.
pub(crate) fn terminate_container(
    tx: &mut Transaction,
    terminator: &FlowNodeInstanceId,
) -> Result<(), CoreError> {
    let container = tx.node(terminator)?.parent.clone();
    abort_container(tx, &container, Some(terminator));
    if let ParentContainer::ProcessInstance(_) = container {
        tx.instance_mut().interrupting_event = true;
    }
    info!(
        container = container.id(),
        flow_node_id = %terminator,
        "Container terminated"
    );
    Ok(())
}

/// Abort one node subtree as a competing branch, then let joins that no
/// longer wait for it fire.
pub(crate) fn abort_branch(tx: &mut Transaction, id: &FlowNodeInstanceId) -> Result<(), CoreError> {
    let container = tx.node(id)?.parent.clone();
    abort_node(tx, id)?;
    prune_gateways(tx, container.id())?;
    check_container_completion(tx, &container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::process_definition::{NodeId, ProcessDefinition};

    const INCLUSIVE: &str = r#"
id: inclusive
name: Inclusive
version: "1"
container:
  nodes:
    - { id: start, type: start_event }
    - { id: fork, type: gateway, gateway: inclusive }
    - { id: a, type: automatic_task }
    - { id: b, type: automatic_task }
    - { id: c, type: automatic_task }
    - { id: join, type: gateway, gateway: inclusive }
    - { id: end, type: end_event }
  transitions:
    - { id: t0, source: start, target: fork }
    - { id: ta, source: fork, target: a }
    - { id: tb, source: fork, target: b }
    - { id: tc, source: fork, target: c }
    - { id: ja, source: a, target: join }
    - { id: jb, source: b, target: join }
    - { id: jc, source: c, target: join }
    - { id: te, source: join, target: end }
"#;

    fn t(id: &str) -> TransitionId {
        TransitionId(id.into())
    }

    #[test]
    fn test_inclusive_join_waits_for_activated_branches() {
        let definition = ProcessDefinition::from_yaml(INCLUSIVE).unwrap();
        let container = &definition.container;
        let join = container.node(&NodeId("join".into())).unwrap();

        let outer = Activation {
            fork_node: NodeId("outer".into()),
            fork_instance: FlowNodeInstanceId("f-0".into()),
            activated: [t("elsewhere")].into_iter().collect(),
        };
        let fork = Activation {
            fork_node: NodeId("fork".into()),
            fork_instance: FlowNodeInstanceId("f-1".into()),
            activated: [t("ta"), t("tc")].into_iter().collect(),
        };

        let (required, remaining) = required_arrivals(container, join, &[outer.clone(), fork]);
        assert_eq!(required, [t("ja"), t("jc")].into_iter().collect());
        assert_eq!(remaining, vec![outer]);
    }

    #[test]
    fn test_join_without_activation_waits_for_all() {
        let definition = ProcessDefinition::from_yaml(INCLUSIVE).unwrap();
        let container = &definition.container;
        let join = container.node(&NodeId("join".into())).unwrap();

        let (required, remaining) = required_arrivals(container, join, &[]);
        assert_eq!(required.len(), 3);
        assert!(remaining.is_empty());
    }
}
