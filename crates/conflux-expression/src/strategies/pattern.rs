use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};

use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::ExpressionStrategy;
use crate::value::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder regex"));

/// `${name}` substitution from dependency values
pub struct PatternStrategy;

impl ExpressionStrategy for PatternStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::Pattern
    }

    fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        if expression.content().is_empty() {
            return Err(ExpressionError::invalid(expression, "content must not be empty"));
        }
        let mut names = HashSet::new();
        for dependency in expression.dependencies() {
            if !names.insert(dependency.name()) {
                return Err(ExpressionError::invalid(
                    expression,
                    format!("duplicate placeholder name '{}'", dependency.name()),
                ));
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        expression: &Expression,
        _context: &EvaluationContext,
        resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        let mut values: HashMap<&str, String> = HashMap::new();
        for dependency in expression.dependencies() {
            let value = resolved
                .get(dependency)
                .ok_or_else(|| ExpressionError::missing(expression, dependency.name()))?;
            values.insert(dependency.name(), value.to_string());
        }

        let content = expression.content();
        if let Some(missing) = PLACEHOLDER
            .captures_iter(content)
            .filter_map(|c| c.get(1))
            .find(|name| !values.contains_key(name.as_str()))
        {
            return Err(ExpressionError::missing(expression, missing.as_str()));
        }

        let substituted = PLACEHOLDER.replace_all(content, |captures: &Captures| {
            captures
                .get(1)
                .and_then(|name| values.get(name.as_str()))
                .cloned()
                .unwrap_or_default()
        });
        Ok(Value::String(substituted.into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ReturnType;

    #[test]
    fn test_substitution() {
        let who = Expression::variable("who", ReturnType::String);
        let count = Expression::variable("count", ReturnType::Integer);
        let expression = Expression::pattern("Hello ${who}, you have ${count} tasks", vec![who.clone(), count.clone()]);

        let mut resolved = ResolvedExpressions::new();
        resolved.insert(&who, Value::String("Ada".into()));
        resolved.insert(&count, Value::Integer(3));

        assert_eq!(
            PatternStrategy.evaluate(&expression, &EvaluationContext::new(), &resolved),
            Ok(Value::String("Hello Ada, you have 3 tasks".into()))
        );
    }

    #[test]
    fn test_content_without_placeholders_is_unchanged() {
        let expression = Expression::pattern("plain text, $ and {braces}", Vec::new());
        assert_eq!(
            PatternStrategy.evaluate(&expression, &EvaluationContext::new(), &ResolvedExpressions::new()),
            Ok(Value::String("plain text, $ and {braces}".into()))
        );
    }

    #[test]
    fn test_unresolved_dependency() {
        let who = Expression::variable("who", ReturnType::String);
        let expression = Expression::pattern("Hello ${who}", vec![who]);
        assert!(matches!(
            PatternStrategy.evaluate(&expression, &EvaluationContext::new(), &ResolvedExpressions::new()),
            Err(ExpressionError::DependencyMissing { .. })
        ));
    }

    #[test]
    fn test_placeholder_without_dependency() {
        let expression = Expression::pattern("Hello ${who}", Vec::new());
        assert_eq!(
            PatternStrategy.evaluate(&expression, &EvaluationContext::new(), &ResolvedExpressions::new()),
            Err(ExpressionError::DependencyMissing {
                expression: "Hello ${who}".into(),
                dependency: "who".into(),
            })
        );
    }

    #[test]
    fn test_duplicate_names_are_invalid() {
        let expression = Expression::pattern(
            "${a}",
            vec![
                Expression::variable("a", ReturnType::String),
                Expression::constant("a", ReturnType::String),
            ],
        );
        assert!(PatternStrategy.validate(&expression).is_err());
    }
}
