use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::value::Value;

/// One expression dialect.
///
/// The evaluator resolves every dependency before calling `evaluate`, so a
/// strategy reads dependency values from `resolved` and never recurses.
pub trait ExpressionStrategy: Send + Sync {
    /// Dialect this strategy handles
    fn kind(&self) -> ExpressionKind;

    /// Structural checks that do not need any values
    fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        if expression.content().trim().is_empty() {
            return Err(ExpressionError::invalid(expression, "content must not be empty"));
        }
        Ok(())
    }

    /// Compute the value of the expression
    fn evaluate(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
        resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError>;
}

/// Values of all dependencies, in declaration order
pub(crate) fn dependency_values<'a>(
    expression: &'a Expression,
    resolved: &'a ResolvedExpressions,
) -> Result<Vec<&'a Value>, ExpressionError> {
    expression
        .dependencies()
        .iter()
        .map(|dependency| {
            resolved
                .get(dependency)
                .ok_or_else(|| ExpressionError::missing(expression, dependency.name()))
        })
        .collect()
}
