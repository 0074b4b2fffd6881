use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::ExpressionStrategy;
use crate::value::Value;

/// Process definition parameter lookup
pub struct ParameterStrategy;

impl ExpressionStrategy for ParameterStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::Parameter
    }

    fn evaluate(
        &self,
        expression: &Expression,
        context: &EvaluationContext,
        _resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        context
            .get_parameter(expression.content())
            .cloned()
            .ok_or_else(|| {
                ExpressionError::missing(expression, format!("parameter {}", expression.content()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ReturnType;
    use std::collections::HashMap;

    #[test]
    fn test_parameter_lookup() {
        let mut parameters = HashMap::new();
        parameters.insert("endpoint".to_string(), Value::String("https://erp".into()));
        let context = EvaluationContext::new().parameters(parameters);

        let expression = Expression::parameter("endpoint", ReturnType::String);
        assert_eq!(
            ParameterStrategy.evaluate(&expression, &context, &ResolvedExpressions::new()),
            Ok(Value::String("https://erp".into()))
        );

        let missing = Expression::parameter("timeout", ReturnType::Long);
        assert!(matches!(
            ParameterStrategy.evaluate(&missing, &context, &ResolvedExpressions::new()),
            Err(ExpressionError::DependencyMissing { .. })
        ));
    }
}
