use std::cmp::Ordering;

use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::{dependency_values, ExpressionStrategy};
use crate::value::{ReturnType, Value};

const OPERATORS: &[&str] = &["<", ">", "<=", ">=", "==", "!=", "!"];

/// Unary negation and binary comparison
pub struct ConditionStrategy;

impl ExpressionStrategy for ConditionStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::Condition
    }

    fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        let operator = expression.content().trim();
        if !OPERATORS.contains(&operator) {
            return Err(ExpressionError::invalid(
                expression,
                format!("unknown operator '{}'", operator),
            ));
        }
        if expression.return_type() != ReturnType::Boolean {
            return Err(ExpressionError::invalid(
                expression,
                "conditions must return boolean",
            ));
        }
        let expected = if operator == "!" { 1 } else { 2 };
        if expression.dependencies().len() != expected {
            return Err(ExpressionError::invalid(
                expression,
                format!(
                    "operator '{}' takes {} operand(s), got {}",
                    operator,
                    expected,
                    expression.dependencies().len()
                ),
            ));
        }
        Ok(())
    }

    fn evaluate(
        &self,
        expression: &Expression,
        _context: &EvaluationContext,
        resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        let operator = expression.content().trim();
        let operands = dependency_values(expression, resolved)?;

        let result = match (operator, operands.as_slice()) {
            ("!", [Value::Boolean(b)]) => !b,
            ("!", [other]) => {
                return Err(ExpressionError::evaluation(
                    expression,
                    format!("cannot negate a {}", other.type_name()),
                ))
            }
            ("==", [left, right]) => equals(left, right),
            ("!=", [left, right]) => !equals(left, right),
            (op, [left, right]) => {
                let ordering = compare(left, right).ok_or_else(|| {
                    ExpressionError::evaluation(
                        expression,
                        format!(
                            "{} and {} are not comparable",
                            left.type_name(),
                            right.type_name()
                        ),
                    )
                })?;
                match op {
                    "<" => ordering == Ordering::Less,
                    ">" => ordering == Ordering::Greater,
                    "<=" => ordering != Ordering::Greater,
                    ">=" => ordering != Ordering::Less,
                    _ => {
                        return Err(ExpressionError::evaluation(
                            expression,
                            format!("unknown operator '{}'", op),
                        ))
                    }
                }
            }
            (op, values) => {
                return Err(ExpressionError::evaluation(
                    expression,
                    format!("operator '{}' cannot take {} operand(s)", op, values.len()),
                ))
            }
        };

        Ok(Value::Boolean(result))
    }
}

/// Numeric operands compare by value across widths, everything else by
/// structural equality.
fn equals(left: &Value, right: &Value) -> bool {
    if left.is_numeric() && right.is_numeric() {
        return match (left.to_decimal(), right.to_decimal()) {
            (Some(l), Some(r)) => l == r,
            _ => left.as_f64() == right.as_f64(),
        };
    }
    left == right
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (l, r) if l.is_numeric() && r.is_numeric() => match (l.to_decimal(), r.to_decimal()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Date(l), Value::Date(r)) => Some(l.cmp(r)),
        (Value::Boolean(l), Value::Boolean(r)) => Some(l.cmp(r)),
        _ => None,
    }
}
