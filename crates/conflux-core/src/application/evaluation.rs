//! Expression evaluation on behalf of the controller.
//!
//! Contexts are snapshots of the instance state, so the evaluation of a
//! completion can run after the instance lock was released.

use conflux_expression::{
    ContainerContext, ContainerType, EngineConstant, EvaluationContext, ExpressionEvaluator,
    ResolvedExpressions, Value,
};
use std::collections::{BTreeMap, HashMap};

use super::runtime::InstanceRuntime;
use crate::domain::flow_node::{FlowNodeInstance, FlowNodeInstanceId, FlowNodeType, ParentContainer};
use crate::domain::process_definition::{
    DataDefinition, FlowNodeDefinition, GatewayKind, NodeId, Operation, TransitionDefinition,
    TransitionId,
};
use crate::domain::process_instance::ProcessInstanceId;
use crate::CoreError;

fn base_context(runtime: &InstanceRuntime, values: HashMap<String, Value>) -> EvaluationContext {
    let instance_id = Value::String(runtime.instance.id.0.clone());
    let definition_id = runtime.definition.id.0.clone();
    EvaluationContext::with_values(values)
        .parameters(runtime.definition.parameter_values())
        .engine_constant(EngineConstant::ProcessInstanceId, instance_id.clone())
        .engine_constant(EngineConstant::RootProcessInstanceId, instance_id)
        .engine_constant(
            EngineConstant::ProcessDefinitionId,
            Value::String(definition_id.clone()),
        )
        .definition(definition_id)
}

/// Context for instance-level expressions: data defaults and string indexes
pub(crate) fn instance_context(
    runtime: &InstanceRuntime,
    values: HashMap<String, Value>,
) -> EvaluationContext {
    base_context(runtime, values).container(ContainerContext::new(
        ContainerType::ProcessInstance,
        runtime.instance.id.0.clone(),
    ))
}

/// Context for a flow node: visible scope values overlaid with its inputs.
/// A sub-process also sees its own child scope.
pub(crate) fn node_context(runtime: &InstanceRuntime, node: &FlowNodeInstance) -> EvaluationContext {
    let scope = match node.node_type {
        FlowNodeType::SubProcess => ParentContainer::Activity(node.id.clone()),
        _ => node.parent.clone(),
    };
    let mut values = runtime.visible_variables(&scope);
    values.extend(node.inputs.iter().map(|(k, v)| (k.clone(), v.clone())));

    base_context(runtime, values)
        .engine_constant(
            EngineConstant::FlowNodeInstanceId,
            Value::String(node.id.0.clone()),
        )
        .engine_constant(
            EngineConstant::ExecutedBy,
            node.executed_by
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        )
        .container(ContainerContext::new(
            ContainerType::FlowNodeInstance,
            node.id.0.clone(),
        ))
}

/// Evaluate a node's inputs with one shared resolved cache
pub(crate) fn evaluate_inputs(
    evaluator: &ExpressionEvaluator,
    definition: &FlowNodeDefinition,
    context: &EvaluationContext,
) -> Result<BTreeMap<String, Value>, CoreError> {
    let mut resolved = ResolvedExpressions::new();
    definition
        .inputs
        .iter()
        .map(|(name, expression)| {
            let value = evaluator.evaluate(expression, context, &mut resolved)?;
            Ok((name.clone(), value))
        })
        .collect()
}

/// Initial values of a data scope.
///
/// Supplied values win over declared defaults; each default sees the values
/// declared before it.
pub(crate) fn evaluate_data_defaults(
    evaluator: &ExpressionEvaluator,
    data: &[DataDefinition],
    context: EvaluationContext,
    supplied: &HashMap<String, Value>,
) -> Result<BTreeMap<String, Value>, CoreError> {
    let mut context = context;
    let mut values = BTreeMap::new();

    for declaration in data {
        let value = match (supplied.get(&declaration.name), &declaration.default_value) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => {
                evaluator.evaluate(default, &context, &mut ResolvedExpressions::new())?
            }
            (None, None) => Value::Null,
        };
        context = context.value(declaration.name.clone(), value.clone());
        values.insert(declaration.name.clone(), value);
    }

    for (name, value) in supplied {
        values.entry(name.clone()).or_insert_with(|| value.clone());
    }

    Ok(values)
}

/// Which outgoing transitions a completing node takes
pub(crate) fn select_transitions(
    evaluator: &ExpressionEvaluator,
    node_id: &NodeId,
    gateway: Option<GatewayKind>,
    outgoing: &[TransitionDefinition],
    default_transition: Option<&TransitionId>,
    context: &EvaluationContext,
) -> Result<Vec<TransitionId>, CoreError> {
    if outgoing.is_empty() {
        return Ok(Vec::new());
    }
    if gateway == Some(GatewayKind::Parallel) {
        return Ok(outgoing.iter().map(|t| t.id.clone()).collect());
    }

    let mut resolved = ResolvedExpressions::new();
    let mut taken = Vec::new();
    for transition in outgoing {
        if Some(&transition.id) == default_transition {
            continue;
        }
        let holds = match &transition.condition {
            None => true,
            Some(condition) => match evaluator.evaluate(condition, context, &mut resolved)? {
                Value::Boolean(b) => b,
                other => {
                    return Err(CoreError::Evaluation(format!(
                        "guard of transition '{}' evaluated to {} instead of a boolean",
                        transition.id,
                        other.type_name()
                    )))
                }
            },
        };
        if holds {
            taken.push(transition.id.clone());
            if gateway == Some(GatewayKind::Exclusive) {
                break;
            }
        }
    }

    if taken.is_empty() {
        match default_transition {
            Some(default) => taken.push(default.clone()),
            None => {
                return Err(CoreError::Evaluation(format!(
                    "no outgoing transition of '{}' applies",
                    node_id
                )))
            }
        }
    }
    Ok(taken)
}

/// Everything the off-lock phase of a completion needs
#[derive(Debug, Clone)]
pub(crate) struct CompletionPlan {
    pub process_instance_id: ProcessInstanceId,
    pub flow_node_id: FlowNodeInstanceId,
    pub node_id: NodeId,
    pub gateway: Option<GatewayKind>,
    pub outputs: Vec<Operation>,
    pub outgoing: Vec<TransitionDefinition>,
    pub default_transition: Option<TransitionId>,
    pub context: EvaluationContext,
}

impl CompletionPlan {
    pub fn new(
        runtime: &InstanceRuntime,
        node: &FlowNodeInstance,
        definition: &FlowNodeDefinition,
    ) -> Result<Self, CoreError> {
        let container = runtime.container_definition(&node.parent)?;
        Ok(Self {
            process_instance_id: node.process_instance_id.clone(),
            flow_node_id: node.id.clone(),
            node_id: node.node_id.clone(),
            gateway: definition.kind.gateway(),
            outputs: definition.outputs.clone(),
            outgoing: container.outgoing(&node.node_id).into_iter().cloned().collect(),
            default_transition: definition.default_transition.clone(),
            context: node_context(runtime, node),
        })
    }
}

/// Result of the off-lock phase of a completion
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompletionOutcome {
    pub outputs: Vec<(String, Value)>,
    pub taken: Vec<TransitionId>,
}

/// Evaluate outputs in declaration order, each seeing the ones before it,
/// then the guards against the updated values
pub(crate) fn evaluate_completion(
    evaluator: &ExpressionEvaluator,
    plan: &CompletionPlan,
) -> Result<CompletionOutcome, CoreError> {
    let mut context = plan.context.clone();
    let mut outputs = Vec::with_capacity(plan.outputs.len());
    for operation in &plan.outputs {
        // a fresh cache per output: an earlier output may have changed a dependency
        let value = evaluator.evaluate(
            &operation.expression,
            &context,
            &mut ResolvedExpressions::new(),
        )?;
        context = context.value(operation.variable.clone(), value.clone());
        outputs.push((operation.variable.clone(), value));
    }

    let taken = select_transitions(
        evaluator,
        &plan.node_id,
        plan.gateway,
        &plan.outgoing,
        plan.default_transition.as_ref(),
        &context,
    )?;

    Ok(CompletionOutcome { outputs, taken })
}
