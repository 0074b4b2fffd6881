use std::sync::Arc;
use tracing::debug;

use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::script_cache::{CompiledScript, ScriptCache};
use crate::strategy::ExpressionStrategy;
use crate::value::Value;

/// Shell used when the context names no definition
pub const GLOBAL_SHELL: &str = "__global__";

/// JEXL scripts evaluated against a binding of the referenced values.
///
/// Only identifiers the script actually references are bound: dependency
/// results by name first, then variables, then definition parameters.
pub struct ScriptStrategy {
    cache: Arc<dyn ScriptCache>,
}

impl ScriptStrategy {
    /// Strategy backed by the given cache
    pub fn new(cache: Arc<dyn ScriptCache>) -> Self {
        Self { cache }
    }

    fn rename(expression: &Expression, error: ExpressionError) -> ExpressionError {
        match error {
            ExpressionError::InvalidExpression { reason, .. } => {
                ExpressionError::invalid(expression, reason)
            }
            other => other,
        }
    }
}

impl ExpressionStrategy for ScriptStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::Script
    }

    fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        CompiledScript::compile(expression.content())
            .map(|_| ())
            .map_err(|e| Self::rename(expression, e))
    }

    fn evaluate(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
        resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        let shell = context.definition_id().unwrap_or(GLOBAL_SHELL);
        let script = self
            .cache
            .get_or_compile(shell, expression.content())
            .map_err(|e| Self::rename(expression, e))?;

        let mut binding = serde_json::Map::new();
        for identifier in script.identifiers() {
            let value = expression
                .dependencies()
                .iter()
                .find(|d| d.name() == identifier)
                .and_then(|d| resolved.get(d))
                .or_else(|| context.get_value(identifier))
                .or_else(|| context.get_parameter(identifier));
            if let Some(value) = value {
                binding.insert(identifier.clone(), value.to_json());
            }
        }

        debug!(
            expression = expression.name(),
            shell,
            bound = binding.len(),
            "Evaluating script"
        );

        let evaluator = jexl_eval::Evaluator::new();
        let result = evaluator
            .eval_in_context(script.source(), serde_json::Value::Object(binding))
            .map_err(|e| {
                ExpressionError::evaluation(expression, format!("script failed: {}", e))
            })?;

        Ok(Value::from_json_as(&result, expression.return_type()))
    }
}
