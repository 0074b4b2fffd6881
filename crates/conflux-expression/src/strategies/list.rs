use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::{dependency_values, ExpressionStrategy};
use crate::value::Value;

/// Ordered list of the resolved dependencies
pub struct ListStrategy;

impl ExpressionStrategy for ListStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::List
    }

    fn validate(&self, _expression: &Expression) -> Result<(), ExpressionError> {
        Ok(())
    }

    fn evaluate(
        &self,
        expression: &Expression,
        _context: &EvaluationContext,
        resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        let values = dependency_values(expression, resolved)?;
        Ok(Value::List(values.into_iter().cloned().collect()))
    }
}
