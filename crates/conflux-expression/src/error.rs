use thiserror::Error;

use crate::context::ContainerContext;
use crate::expression::{Expression, ExpressionKind};

/// Error type for expression validation and evaluation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// The expression is structurally invalid for its dialect
    #[error("Invalid expression '{name}': {reason}")]
    InvalidExpression {
        /// Name of the offending expression
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A value the expression depends on was not supplied
    #[error("Dependency missing for expression '{expression}': {dependency}")]
    DependencyMissing {
        /// Name of the expression being evaluated
        expression: String,
        /// Name of the dependency or variable that was not found
        dependency: String,
    },

    /// Evaluation ran but could not produce a value
    #[error("Evaluation error in expression '{expression}': {message}{}", describe_container(.container))]
    Evaluation {
        /// Name of the expression being evaluated
        expression: String,
        /// What went wrong
        message: String,
        /// Process instance or flow node the evaluation was made for
        container: Option<ContainerContext>,
    },

    /// No strategy is registered for the expression's kind
    #[error("No strategy registered for expression kind: {0:?}")]
    UnsupportedKind(ExpressionKind),
}

fn describe_container(container: &Option<ContainerContext>) -> String {
    container
        .as_ref()
        .map(|c| format!(" [{}]", c))
        .unwrap_or_default()
}

impl ExpressionError {
    /// Build an `InvalidExpression` error for the given expression
    pub fn invalid(expression: &Expression, reason: impl Into<String>) -> Self {
        ExpressionError::InvalidExpression {
            name: expression.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Build a `DependencyMissing` error for the given expression
    pub fn missing(expression: &Expression, dependency: impl Into<String>) -> Self {
        ExpressionError::DependencyMissing {
            expression: expression.name().to_string(),
            dependency: dependency.into(),
        }
    }

    /// Build an `Evaluation` error without container context
    pub fn evaluation(expression: &Expression, message: impl Into<String>) -> Self {
        ExpressionError::Evaluation {
            expression: expression.name().to_string(),
            message: message.into(),
            container: None,
        }
    }

    /// Attach the container the evaluation was made for
    pub fn with_container(self, context: Option<ContainerContext>) -> Self {
        match self {
            ExpressionError::Evaluation {
                expression,
                message,
                container,
            } => ExpressionError::Evaluation {
                expression,
                message,
                container: container.or(context),
            },
            other => other,
        }
    }
}
