//! Process Instance Controller
//!
//! Owns the lifecycle of running process instances. Every mutating
//! operation takes the instance's lock, works on a [`Transaction`] copy of
//! its state and commits that copy only once persistence accepted it.
//! Operations on different instances never contend.
//!
//! Completing a flow node happens in two phases: the node is claimed
//! (COMPLETING) under the lock, its outputs and guards are evaluated without
//! the lock, and the result is committed under the lock again. A cancel that
//! arrives in between leaves the claimed node to finish and aborts whatever
//! it creates. A commit that fails after the claim moves the node to
//! FAILED, so it can be retried, skipped or aborted like any other failure.

use async_trait::async_trait;
use conflux_expression::{ExpressionEvaluator, Value};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::cancellation::{abort_container, abort_node};
use super::evaluation::{
    evaluate_completion, evaluate_inputs, instance_context, node_context, select_transitions,
    CompletionOutcome, CompletionPlan,
};
use super::flow_navigation::{
    abort_branch, check_container_completion, enter_container, leave_node, prune_gateways,
    terminate_container,
};
use super::runtime::{InstanceRuntime, Published, Transaction};
use super::DomainEventHandler;
use crate::config::EngineConfig;
use crate::domain::flow_node::{
    FlowNodeInstance, FlowNodeInstanceId, FlowNodeState, FlowNodeType, ParentContainer,
};
use crate::domain::gateway::GatewayRecord;
use crate::domain::process_definition::{FlowNodeDefinition, ProcessDefinitionId};
use crate::domain::process_instance::{ProcessInstance, ProcessInstanceId, ProcessInstanceState};
use crate::domain::repository::{DefinitionResolver, PersistenceService, WorkDispatcher, WorkHandler};
use crate::domain::work::WorkItem;
use crate::CoreError;

/// A flow node claimed by [`ProcessInstanceController::begin_completion`]
#[derive(Debug)]
pub struct CompletionTicket {
    plan: CompletionPlan,
    // the claim lives as long as the ticket
    _claim: Arc<()>,
}

impl CompletionTicket {
    /// The claimed flow node
    pub fn flow_node_id(&self) -> &FlowNodeInstanceId {
        &self.plan.flow_node_id
    }

    /// Its process instance
    pub fn process_instance_id(&self) -> &ProcessInstanceId {
        &self.plan.process_instance_id
    }
}

/// Drives process instances through their lifecycle
pub struct ProcessInstanceController {
    persistence: Arc<dyn PersistenceService>,
    dispatcher: Arc<dyn WorkDispatcher>,
    resolver: Arc<dyn DefinitionResolver>,
    evaluator: Arc<ExpressionEvaluator>,
    event_handler: Arc<dyn DomainEventHandler>,
    config: EngineConfig,
    instances: DashMap<ProcessInstanceId, Arc<Mutex<InstanceRuntime>>>,
    flow_nodes: DashMap<FlowNodeInstanceId, ProcessInstanceId>,
    claims: DashMap<FlowNodeInstanceId, Weak<()>>,
}

impl ProcessInstanceController {
    /// Create a controller over its collaborators
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        dispatcher: Arc<dyn WorkDispatcher>,
        resolver: Arc<dyn DefinitionResolver>,
        evaluator: Arc<ExpressionEvaluator>,
        event_handler: Arc<dyn DomainEventHandler>,
        config: EngineConfig,
    ) -> Self {
        Self {
            persistence,
            dispatcher,
            resolver,
            evaluator,
            event_handler,
            config,
            instances: DashMap::with_capacity(64),
            flow_nodes: DashMap::with_capacity(256),
            claims: DashMap::new(),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start an instance of a deployed definition.
    ///
    /// Refuses unresolved definitions. `initial_variables` override the
    /// declared defaults of the process data scope.
    pub async fn start_process(
        &self,
        definition_id: &ProcessDefinitionId,
        initial_variables: HashMap<String, Value>,
        started_by: Option<String>,
    ) -> Result<ProcessInstance, CoreError> {
        let definition = self
            .persistence
            .load_process_definition(definition_id)
            .await?
            .ok_or_else(|| CoreError::ProcessDefinitionNotFound(definition_id.0.clone()))?;

        let problems = self.resolver.get_resolution_problems(definition_id).await?;
        if !problems.is_empty() {
            warn!(
                definition_id = %definition_id,
                problems = problems.len(),
                "Refusing to start unresolved definition"
            );
            return Err(CoreError::DefinitionUnresolved(problems));
        }

        let instance = ProcessInstance::new(&definition, started_by);
        let mut tx = Transaction::new(InstanceRuntime::new(Arc::new(definition), instance));
        tx.transition_instance(ProcessInstanceState::Initializing)?;

        let root = tx.root();
        enter_container(&mut tx, &self.evaluator, &root, &initial_variables)?;
        self.evaluate_string_indexes(&mut tx)?;
        tx.transition_instance(ProcessInstanceState::Started)?;

        self.persistence.persist(&tx.change_set()).await?;

        let (runtime, published) = tx.into_parts();
        let snapshot = runtime.instance.clone();
        let slot = Arc::new(Mutex::new(runtime));
        // hold the new instance until its first work and events are out
        let _guard = slot.lock().await;
        self.instances.insert(snapshot.id.clone(), Arc::clone(&slot));
        self.publish(&snapshot.id, published).await?;

        info!(
            process_instance_id = %snapshot.id,
            definition_id = %snapshot.definition_id,
            "Process instance started"
        );
        Ok(snapshot)
    }

    fn evaluate_string_indexes(&self, tx: &mut Transaction) -> Result<(), CoreError> {
        let definition = Arc::clone(&tx.definition);
        for index in &definition.string_indexes {
            let Some(expression) = &index.value else {
                continue;
            };
            let root = tx.root();
            let values = tx.visible_variables(&root);
            let context = instance_context(tx, values);
            let value = self.evaluator.evaluate(
                expression,
                &context,
                &mut conflux_expression::ResolvedExpressions::new(),
            )?;
            let text = match value {
                Value::Null => None,
                other => Some(other.to_string()),
            };
            tx.instance_mut().set_string_index(index.index, text)?;
        }
        Ok(())
    }

    /// Move a READY flow node on. Automatic nodes complete right away; human
    /// tasks, catch events and sub-processes enter EXECUTING and wait.
    pub async fn execute_flow_node(
        &self,
        flow_node_id: &FlowNodeInstanceId,
    ) -> Result<FlowNodeInstance, CoreError> {
        let slot = self.locate(flow_node_id)?;
        let mut guard = slot.lock().await;
        let mut tx = Transaction::new((*guard).clone());

        let node = tx.node(flow_node_id)?.clone();
        if node.state != FlowNodeState::Ready {
            return Err(node.state_error("execute"));
        }
        let definition = tx.node_definition(&node)?.clone();
        if definition.kind.is_automatic() {
            drop(guard);
            return self
                .complete_flow_node(flow_node_id, &self.config.system_actor)
                .await;
        }

        tx.transition_node(flow_node_id, FlowNodeState::Executing)?;
        let mut outcome = self.evaluate_node_inputs(&mut tx, flow_node_id, &definition);
        if outcome.is_ok() && node.node_type == FlowNodeType::SubProcess {
            let child = ParentContainer::Activity(flow_node_id.clone());
            outcome = enter_container(&mut tx, &self.evaluator, &child, &HashMap::new());
        }
        if let Err(e) = outcome {
            fail_node(&mut tx, flow_node_id, &e)?;
            self.commit(&mut guard, tx).await?;
            return Err(e);
        }

        let executed = tx.node(flow_node_id)?.clone();
        self.commit(&mut guard, tx).await?;
        Ok(executed)
    }

    fn evaluate_node_inputs(
        &self,
        tx: &mut Transaction,
        flow_node_id: &FlowNodeInstanceId,
        definition: &FlowNodeDefinition,
    ) -> Result<(), CoreError> {
        if definition.inputs.is_empty() {
            return Ok(());
        }
        let context = node_context(tx, tx.node(flow_node_id)?);
        let inputs = evaluate_inputs(&self.evaluator, definition, &context)?;
        tx.node_mut(flow_node_id)?.inputs = inputs;
        Ok(())
    }

    /// Complete a flow node on behalf of an actor.
    ///
    /// Valid from EXECUTING, or from READY for automatic nodes. An expression
    /// failure leaves the node FAILED and is returned.
    pub async fn complete_flow_node(
        &self,
        flow_node_id: &FlowNodeInstanceId,
        actor: &str,
    ) -> Result<FlowNodeInstance, CoreError> {
        let ticket = self.begin_completion(flow_node_id, actor).await?;
        self.finish_completion(ticket).await
    }

    /// First phase of a completion: claim the node (COMPLETING) and
    /// snapshot what its outputs and guards need. The instance lock is
    /// released on return.
    ///
    /// A COMPLETING node whose ticket was dropped unfinished can be claimed
    /// again.
    pub async fn begin_completion(
        &self,
        flow_node_id: &FlowNodeInstanceId,
        actor: &str,
    ) -> Result<CompletionTicket, CoreError> {
        let slot = self.locate(flow_node_id)?;
        let mut guard = slot.lock().await;
        let mut tx = Transaction::new((*guard).clone());

        let node = tx.node(flow_node_id)?.clone();
        let definition = tx.node_definition(&node)?.clone();
        match node.state {
            FlowNodeState::Executing => {}
            FlowNodeState::Ready if definition.kind.is_automatic() => {
                tx.transition_node(flow_node_id, FlowNodeState::Executing)?;
                if let Err(e) = self.evaluate_node_inputs(&mut tx, flow_node_id, &definition) {
                    fail_node(&mut tx, flow_node_id, &e)?;
                    self.commit(&mut guard, tx).await?;
                    return Err(e);
                }
            }
            FlowNodeState::Completing if !self.is_claimed(flow_node_id) => {
                debug!(flow_node_id = %flow_node_id, "Reclaiming an abandoned completion");
            }
            _ => return Err(node.state_error("complete")),
        }

        let child = ParentContainer::Activity(flow_node_id.clone());
        if node.node_type == FlowNodeType::SubProcess && !tx.live_nodes(child.id()).is_empty() {
            return Err(node.state_error("complete while its sub-process is running"));
        }

        tx.node_mut(flow_node_id)?.executed_by = Some(actor.to_string());
        if node.state != FlowNodeState::Completing {
            tx.transition_node(flow_node_id, FlowNodeState::Completing)?;
        }
        let plan = CompletionPlan::new(&tx, tx.node(flow_node_id)?, &definition)?;

        self.commit(&mut guard, tx).await?;
        let claim = Arc::new(());
        self.claims
            .insert(flow_node_id.clone(), Arc::downgrade(&claim));
        Ok(CompletionTicket {
            plan,
            _claim: claim,
        })
    }

    fn is_claimed(&self, flow_node_id: &FlowNodeInstanceId) -> bool {
        self.claims
            .get(flow_node_id)
            .map_or(false, |claim| claim.strong_count() > 0)
    }

    /// Second phase of a completion: evaluate outputs and guards without
    /// the lock, then commit under it. A cancel that arrived since the claim
    /// aborts whatever the completion creates.
    pub async fn finish_completion(
        &self,
        ticket: CompletionTicket,
    ) -> Result<FlowNodeInstance, CoreError> {
        let outcome = evaluate_completion(&self.evaluator, &ticket.plan);
        let result = self.commit_completion(&ticket.plan, outcome).await;
        self.claims.remove(ticket.flow_node_id());
        result
    }

    async fn commit_completion(
        &self,
        plan: &CompletionPlan,
        outcome: Result<CompletionOutcome, CoreError>,
    ) -> Result<FlowNodeInstance, CoreError> {
        let id = &plan.flow_node_id;
        let slot = self.slot(&plan.process_instance_id)?;
        let mut guard = slot.lock().await;

        let node = guard.node(id)?.clone();
        if node.state != FlowNodeState::Completing {
            return Err(node.state_error("finish completing"));
        }

        let cause = match outcome {
            Ok(outcome) => match self.apply_completion(&mut guard, &node, outcome).await {
                Ok(completed) => return Ok(completed),
                Err(e) => e,
            },
            Err(e) => e,
        };
        if let Err(e) = self.release_claim(&mut guard, id, &cause).await {
            error!(
                flow_node_id = %id,
                cause = %cause,
                error = %e,
                "Could not release completion claim"
            );
            return Err(e);
        }
        Err(cause)
    }

    async fn apply_completion(
        &self,
        live: &mut InstanceRuntime,
        node: &FlowNodeInstance,
        outcome: CompletionOutcome,
    ) -> Result<FlowNodeInstance, CoreError> {
        let id = &node.id;
        let mut tx = Transaction::new(live.clone());

        for (name, value) in outcome.outputs {
            let scope = tx.declaring_scope(&node.parent, &name);
            tx.write_variable(&scope, &name, value);
        }
        tx.transition_node(id, FlowNodeState::Completed)?;

        let interrupted = tx.interrupting() || node.interrupt_requested;
        if node.node_type == FlowNodeType::TerminateEndEvent && !interrupted {
            terminate_container(&mut tx, id)?;
        }
        leave_node(&mut tx, id, &outcome.taken, interrupted)?;
        prune_gateways(&mut tx, node.parent.id())?;
        check_container_completion(&mut tx, &node.parent)?;

        let completed = tx.node(id)?.clone();
        self.commit(live, tx).await?;
        Ok(completed)
    }

    /// Move a node still COMPLETING after a failed completion to FAILED.
    /// If even that cannot be persisted the node stays COMPLETING, unclaimed.
    async fn release_claim(
        &self,
        live: &mut InstanceRuntime,
        id: &FlowNodeInstanceId,
        cause: &CoreError,
    ) -> Result<(), CoreError> {
        if !matches!(live.node(id), Ok(node) if node.state == FlowNodeState::Completing) {
            return Ok(());
        }
        let mut tx = Transaction::new(live.clone());
        fail_node(&mut tx, id, cause)?;
        self.commit(live, tx).await
    }

    /// Cancel a running instance: every live flow node is aborted and the
    /// instance ends CANCELLED once none is left. A second call only clears
    /// completions whose claim was never released.
    pub async fn cancel_process_instance(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<ProcessInstance, CoreError> {
        self.interrupt(
            process_instance_id,
            ProcessInstanceState::Cancelling,
            ProcessInstanceState::Cancelled,
            "cancel",
        )
        .await
    }

    /// Abort a running instance; like cancel, ending ABORTED
    pub async fn abort_process_instance(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<ProcessInstance, CoreError> {
        self.interrupt(
            process_instance_id,
            ProcessInstanceState::Aborting,
            ProcessInstanceState::Aborted,
            "abort",
        )
        .await
    }

    async fn interrupt(
        &self,
        process_instance_id: &ProcessInstanceId,
        interrupting: ProcessInstanceState,
        terminal: ProcessInstanceState,
        operation: &str,
    ) -> Result<ProcessInstance, CoreError> {
        let slot = self.slot(process_instance_id)?;
        let mut guard = slot.lock().await;

        // unclaimed COMPLETING nodes have no completion left to wait for
        let abandoned: Vec<FlowNodeInstanceId> = guard
            .flow_nodes
            .values()
            .filter(|n| n.state == FlowNodeState::Completing && !self.is_claimed(&n.id))
            .map(|n| n.id.clone())
            .collect();

        let state = guard.instance.state;
        if state == terminal || (state == interrupting && abandoned.is_empty()) {
            debug!(
                process_instance_id = %process_instance_id,
                state = %state,
                operation,
                "Interrupt already in progress"
            );
            return Ok(guard.instance.clone());
        }
        if state != ProcessInstanceState::Started && state != interrupting {
            return Err(guard.instance.state_error(operation));
        }

        let mut tx = Transaction::new((*guard).clone());
        if state == ProcessInstanceState::Started {
            tx.transition_instance(interrupting)?;
        }
        for id in &abandoned {
            tx.node_mut(id)?.failure = Some("completion abandoned".to_string());
            tx.transition_node(id, FlowNodeState::Failed)?;
        }
        let root = tx.root();
        abort_container(&mut tx, &root, None);
        check_container_completion(&mut tx, &root)?;

        let snapshot = tx.instance.clone();
        self.commit(&mut guard, tx).await?;
        info!(
            process_instance_id = %process_instance_id,
            state = %snapshot.state,
            "Process instance interrupted"
        );
        Ok(snapshot)
    }

    /// Put a FAILED flow node back to READY and schedule it again
    pub async fn retry_flow_node(
        &self,
        flow_node_id: &FlowNodeInstanceId,
    ) -> Result<FlowNodeInstance, CoreError> {
        let slot = self.locate(flow_node_id)?;
        let mut guard = slot.lock().await;
        let mut tx = Transaction::new((*guard).clone());

        let node = tx.node(flow_node_id)?.clone();
        if node.state != FlowNodeState::Failed {
            return Err(node.state_error("retry"));
        }
        if tx.instance.state != ProcessInstanceState::Started {
            return Err(tx.instance.state_error("retry a flow node"));
        }

        {
            let failed = tx.node_mut(flow_node_id)?;
            failed.failure = None;
            failed.executed_by = None;
        }
        tx.transition_node(flow_node_id, FlowNodeState::Ready)?;
        tx.enqueue(
            node.parent.id(),
            WorkItem::ExecuteFlowNode {
                process_instance_id: node.process_instance_id.clone(),
                flow_node_id: flow_node_id.clone(),
            },
        );

        let retried = tx.node(flow_node_id)?.clone();
        self.commit(&mut guard, tx).await?;
        info!(flow_node_id = %flow_node_id, "Flow node retried");
        Ok(retried)
    }

    /// Bypass a READY or FAILED flow node. Its outputs are not evaluated;
    /// the flow continues along the transitions its guards select.
    pub async fn skip_flow_node(
        &self,
        flow_node_id: &FlowNodeInstanceId,
    ) -> Result<FlowNodeInstance, CoreError> {
        let slot = self.locate(flow_node_id)?;
        let mut guard = slot.lock().await;
        let mut tx = Transaction::new((*guard).clone());

        let node = tx.node(flow_node_id)?.clone();
        if !matches!(node.state, FlowNodeState::Ready | FlowNodeState::Failed) {
            return Err(node.state_error("skip"));
        }
        if tx.instance.state != ProcessInstanceState::Started {
            return Err(tx.instance.state_error("skip a flow node"));
        }

        let definition = tx.node_definition(&node)?.clone();
        let outgoing: Vec<_> = tx
            .container_definition(&node.parent)?
            .outgoing(&node.node_id)
            .into_iter()
            .cloned()
            .collect();
        let taken = select_transitions(
            &self.evaluator,
            &node.node_id,
            definition.kind.gateway(),
            &outgoing,
            definition.default_transition.as_ref(),
            &node_context(&tx, &node),
        )?;

        tx.transition_node(flow_node_id, FlowNodeState::Skipped)?;
        leave_node(&mut tx, flow_node_id, &taken, false)?;
        prune_gateways(&mut tx, node.parent.id())?;
        check_container_completion(&mut tx, &node.parent)?;

        let skipped = tx.node(flow_node_id)?.clone();
        self.commit(&mut guard, tx).await?;
        info!(flow_node_id = %flow_node_id, "Flow node skipped");
        Ok(skipped)
    }

    /// Abort one flow node subtree as a competing branch; joins that no
    /// longer wait for it may fire
    pub async fn abort_flow_node(
        &self,
        flow_node_id: &FlowNodeInstanceId,
    ) -> Result<FlowNodeInstance, CoreError> {
        let slot = self.locate(flow_node_id)?;
        let mut guard = slot.lock().await;
        let mut tx = Transaction::new((*guard).clone());

        let node = tx.node(flow_node_id)?.clone();
        if !node.is_live() {
            return Err(node.state_error("abort"));
        }

        abort_branch(&mut tx, flow_node_id)?;

        let aborted = tx.node(flow_node_id)?.clone();
        self.commit(&mut guard, tx).await?;
        info!(flow_node_id = %flow_node_id, state = %aborted.state, "Flow node aborted");
        Ok(aborted)
    }

    /// Set one classification label (1-based slot)
    pub async fn set_string_index(
        &self,
        process_instance_id: &ProcessInstanceId,
        index: usize,
        value: Option<String>,
    ) -> Result<ProcessInstance, CoreError> {
        let slot = self.slot(process_instance_id)?;
        let mut guard = slot.lock().await;
        if guard.instance.state.is_terminal() {
            return Err(guard.instance.state_error("set a string index"));
        }

        let mut tx = Transaction::new((*guard).clone());
        tx.instance_mut().set_string_index(index, value)?;

        let snapshot = tx.instance.clone();
        self.commit(&mut guard, tx).await?;
        Ok(snapshot)
    }

    /// Drop a finished instance from memory; its persisted state stays.
    ///
    /// Finished instances remain queryable here until they are evicted.
    pub async fn evict_process_instance(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<(), CoreError> {
        let slot = self.slot(process_instance_id)?;
        let guard = slot.lock().await;
        if !guard.instance.state.is_terminal() || guard.flow_nodes.values().any(|n| n.is_live()) {
            return Err(guard.instance.state_error("evict"));
        }

        for flow_node_id in guard.flow_nodes.keys() {
            self.flow_nodes.remove(flow_node_id);
            self.claims.remove(flow_node_id);
        }
        self.instances.remove(process_instance_id);
        debug!(process_instance_id = %process_instance_id, "Process instance evicted");
        Ok(())
    }

    /// Run one dispatched work item. Work whose flow node moved on in the
    /// meantime is discarded.
    pub async fn execute_work(&self, work: WorkItem) -> Result<(), CoreError> {
        let flow_node_id = work.flow_node_id().clone();
        let node = match self.flow_node_instance(&flow_node_id).await {
            Ok(node) => node,
            Err(CoreError::FlowNodeNotFound(_)) | Err(CoreError::ProcessInstanceNotFound(_)) => {
                debug!(flow_node_id = %flow_node_id, "Discarding work for unknown flow node");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let result = match &work {
            WorkItem::ExecuteFlowNode { .. } if node.state == FlowNodeState::Ready => {
                self.execute_flow_node(&flow_node_id).await.map(|_| ())
            }
            WorkItem::CompleteSubProcess { .. } if node.state == FlowNodeState::Executing => self
                .complete_flow_node(&flow_node_id, &self.config.system_actor)
                .await
                .map(|_| ()),
            _ => {
                debug!(
                    flow_node_id = %flow_node_id,
                    state = %node.state,
                    work = ?work,
                    "Discarding stale work"
                );
                return Ok(());
            }
        };

        match result {
            Err(CoreError::FlowNodeState { state, .. }) => {
                debug!(flow_node_id = %flow_node_id, state = %state, "Work lost a race, discarded");
                Ok(())
            }
            other => other,
        }
    }

    /// Snapshot of a process instance
    pub async fn process_instance(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<ProcessInstance, CoreError> {
        let slot = self.slot(process_instance_id)?;
        let guard = slot.lock().await;
        Ok(guard.instance.clone())
    }

    /// Snapshot of a flow node instance
    pub async fn flow_node_instance(
        &self,
        flow_node_id: &FlowNodeInstanceId,
    ) -> Result<FlowNodeInstance, CoreError> {
        let slot = self.locate(flow_node_id)?;
        let guard = slot.lock().await;
        guard.node(flow_node_id).cloned()
    }

    /// Every flow node instance of a process instance, in creation order
    pub async fn flow_node_instances(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<Vec<FlowNodeInstance>, CoreError> {
        let slot = self.slot(process_instance_id)?;
        let guard = slot.lock().await;
        let mut nodes: Vec<_> = guard.flow_nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.sequence);
        Ok(nodes)
    }

    /// Variables of the process data scope
    pub async fn variables(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<BTreeMap<String, Value>, CoreError> {
        let slot = self.slot(process_instance_id)?;
        let guard = slot.lock().await;
        Ok(guard
            .variables
            .get(&guard.instance.root_container_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Join gateway activations of a process instance
    pub async fn gateway_records(
        &self,
        process_instance_id: &ProcessInstanceId,
    ) -> Result<Vec<GatewayRecord>, CoreError> {
        let slot = self.slot(process_instance_id)?;
        let guard = slot.lock().await;
        Ok(guard.gateways.records().cloned().collect())
    }

    fn slot(&self, id: &ProcessInstanceId) -> Result<Arc<Mutex<InstanceRuntime>>, CoreError> {
        self.instances
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CoreError::ProcessInstanceNotFound(id.0.clone()))
    }

    fn locate(&self, id: &FlowNodeInstanceId) -> Result<Arc<Mutex<InstanceRuntime>>, CoreError> {
        let process_instance_id = self
            .flow_nodes
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoreError::FlowNodeNotFound(id.0.clone()))?;
        self.slot(&process_instance_id)
    }

    /// Persist a transaction, then swap it in and publish its effects.
    /// On a persistence failure the live state is left untouched.
    async fn commit(&self, live: &mut InstanceRuntime, tx: Transaction) -> Result<(), CoreError> {
        let changes = tx.change_set();
        if !changes.is_empty() {
            if let Err(e) = self.persistence.persist(&changes).await {
                warn!(
                    process_instance_id = %live.instance.id,
                    error = %e,
                    "Transition rolled back"
                );
                return Err(e);
            }
        }

        let (runtime, published) = tx.into_parts();
        *live = runtime;
        let process_instance_id = live.instance.id.clone();
        self.publish(&process_instance_id, published).await
    }

    async fn publish(
        &self,
        process_instance_id: &ProcessInstanceId,
        published: Published,
    ) -> Result<(), CoreError> {
        for id in published.created {
            self.flow_nodes.insert(id, process_instance_id.clone());
        }

        let mut dispatch_error = None;
        for (container_id, work) in published.work {
            if let Err(e) = self.dispatcher.enqueue(&container_id, work).await {
                error!(
                    process_instance_id = %process_instance_id,
                    container = %container_id,
                    error = %e,
                    "Failed to dispatch work"
                );
                dispatch_error.get_or_insert(e);
            }
        }

        for event in published.events {
            if let Err(e) = self.event_handler.handle_event(event).await {
                warn!(process_instance_id = %process_instance_id, error = %e, "Event handler failed");
            }
        }

        dispatch_error.map_or(Ok(()), Err)
    }
}

/// Record an expression or input failure on a flow node. While an abort is
/// pending the failed node is aborted right away.
fn fail_node(tx: &mut Transaction, id: &FlowNodeInstanceId, error: &CoreError) -> Result<(), CoreError> {
    tx.node_mut(id)?.failure = Some(error.to_string());
    tx.transition_node(id, FlowNodeState::Failed)?;
    warn!(flow_node_id = %id, error = %error, "Flow node failed");

    let node = tx.node(id)?;
    if tx.interrupting() || node.interrupt_requested {
        let parent = node.parent.clone();
        abort_node(tx, id)?;
        prune_gateways(tx, parent.id())?;
        check_container_completion(tx, &parent)?;
    }
    Ok(())
}

#[async_trait]
impl WorkHandler for ProcessInstanceController {
    async fn handle_work(&self, work: WorkItem) -> Result<(), CoreError> {
        self.execute_work(work).await
    }
}
