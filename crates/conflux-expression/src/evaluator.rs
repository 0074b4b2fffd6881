use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::script_cache::ScriptCache;
use crate::strategies::{
    ConditionStrategy, ConstantStrategy, EngineConstantStrategy, ListStrategy,
    MethodCallStrategy, ParameterStrategy, PatternStrategy, ScriptStrategy, VariableStrategy,
};
use crate::strategy::ExpressionStrategy;
use crate::value::Value;

/// Dispatches expressions to the strategy registered for their kind
pub struct ExpressionEvaluator {
    strategies: HashMap<ExpressionKind, Arc<dyn ExpressionStrategy>>,
    check_return_types: bool,
}

impl ExpressionEvaluator {
    /// Evaluator with every built-in dialect; scripts use the given cache
    pub fn new(script_cache: Arc<dyn ScriptCache>) -> Self {
        let mut evaluator = Self::empty();
        evaluator.register(Arc::new(ConstantStrategy));
        evaluator.register(Arc::new(VariableStrategy));
        evaluator.register(Arc::new(ConditionStrategy));
        evaluator.register(Arc::new(PatternStrategy));
        evaluator.register(Arc::new(ListStrategy));
        evaluator.register(Arc::new(MethodCallStrategy));
        evaluator.register(Arc::new(EngineConstantStrategy));
        evaluator.register(Arc::new(ParameterStrategy));
        evaluator.register(Arc::new(ScriptStrategy::new(script_cache)));
        evaluator
    }

    /// Evaluator with no dialects registered
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
            check_return_types: false,
        }
    }

    /// Register a strategy, replacing any previous one for the same kind
    pub fn register(&mut self, strategy: Arc<dyn ExpressionStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    /// Enable or disable checking results against declared return types
    pub fn with_return_type_check(mut self, enabled: bool) -> Self {
        self.check_return_types = enabled;
        self
    }

    /// Whether return types are checked after evaluation
    pub fn checks_return_types(&self) -> bool {
        self.check_return_types
    }

    fn strategy(&self, kind: ExpressionKind) -> Result<&Arc<dyn ExpressionStrategy>, ExpressionError> {
        self.strategies
            .get(&kind)
            .ok_or(ExpressionError::UnsupportedKind(kind))
    }

    /// Validate an expression tree without evaluating it
    pub fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        for dependency in expression.dependencies() {
            self.validate(dependency)?;
        }
        self.strategy(expression.kind())?.validate(expression)
    }

    /// Evaluate one expression.
    ///
    /// Dependencies are evaluated first and every result is recorded in
    /// `resolved`, so callers sharing the cache evaluate each distinct
    /// sub-expression once.
    pub fn evaluate(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
        resolved: &mut ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        self.validate(expression)?;
        self.evaluate_validated(expression, context, resolved)
    }

    /// Evaluate expressions in order, sharing one resolved cache
    pub fn evaluate_all(
        &self,
        expressions: &[Expression],
        context: &EvaluationContext,
    ) -> Result<Vec<Value>, ExpressionError> {
        let mut resolved = ResolvedExpressions::new();
        expressions
            .iter()
            .map(|expression| self.evaluate(expression, context, &mut resolved))
            .collect()
    }

    fn evaluate_validated(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
        resolved: &mut ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        if let Some(value) = resolved.get(expression) {
            return Ok(value.clone());
        }

        for dependency in expression.dependencies() {
            self.evaluate_validated(dependency, context, resolved)?;
        }

        let strategy = self.strategy(expression.kind())?;
        let value = strategy
            .evaluate(expression, context, resolved)
            .map_err(|e| e.with_container(context.container_context().cloned()))?;

        if self.check_return_types && !expression.return_type().accepts(&value) {
            return Err(ExpressionError::evaluation(
                expression,
                format!(
                    "declared return type {} but evaluated to {} ({})",
                    expression.return_type(),
                    value.type_name(),
                    value
                ),
            )
            .with_container(context.container_context().cloned()));
        }

        trace!(expression = expression.name(), kind = ?expression.kind(), value = %value, "Expression evaluated");
        resolved.insert(expression, value.clone());
        Ok(value)
    }
}
