use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::ExpressionStrategy;
use crate::value::Value;

/// Named value from the data scope snapshot
pub struct VariableStrategy;

impl ExpressionStrategy for VariableStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::Variable
    }

    fn evaluate(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
        _resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        context
            .get_value(expression.content())
            .cloned()
            .ok_or_else(|| ExpressionError::missing(expression, expression.content()))
    }
}
