use crate::context::{EngineConstant, EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::ExpressionStrategy;
use crate::value::Value;

/// Values the engine provides, such as the current process instance id
pub struct EngineConstantStrategy;

impl ExpressionStrategy for EngineConstantStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::EngineConstant
    }

    fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        expression
            .content()
            .parse::<EngineConstant>()
            .map(|_| ())
            .map_err(|reason| ExpressionError::invalid(expression, reason))
    }

    fn evaluate(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
        _resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        let constant = expression
            .content()
            .parse::<EngineConstant>()
            .map_err(|reason| ExpressionError::invalid(expression, reason))?;

        context
            .get_engine_constant(constant)
            .cloned()
            .ok_or_else(|| ExpressionError::missing(expression, constant.as_str()))
    }
}
