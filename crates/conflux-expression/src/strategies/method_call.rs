use chrono::{Datelike, Timelike};

use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::{dependency_values, ExpressionStrategy};
use crate::value::Value;

/// Zero-argument accessor on one resolved value.
///
/// Objects resolve `getFoo`, `isFoo` and `foo` to the `foo` field, and fall
/// back to a JMESPath query for dotted or indexed paths.
pub struct MethodCallStrategy;

impl ExpressionStrategy for MethodCallStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::MethodCall
    }

    fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        if expression.content().trim().is_empty() {
            return Err(ExpressionError::invalid(expression, "method name must not be empty"));
        }
        if expression.dependencies().len() != 1 {
            return Err(ExpressionError::invalid(
                expression,
                format!(
                    "method call needs exactly one target, got {}",
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
        let method = expression.content().trim();
        let target = match dependency_values(expression, resolved)?.as_slice() {
            [target] => (*target).clone(),
            other => {
                return Err(ExpressionError::evaluation(
                    expression,
                    format!("method call needs exactly one target, got {}", other.len()),
                ))
            }
        };

        invoke(&target, method).map_err(|message| ExpressionError::evaluation(expression, message))
    }
}

fn invoke(target: &Value, method: &str) -> Result<Value, String> {
    if method == "toString" && !matches!(target, Value::Null) {
        return Ok(Value::String(target.to_string()));
    }

    let found = match target {
        Value::Null => return Err(format!("cannot call '{}' on null", method)),
        Value::Object(_) => object_accessor(target, method)?,
        Value::String(s) => match method {
            "length" => Some(Value::Integer(s.chars().count() as i32)),
            "isEmpty" => Some(Value::Boolean(s.is_empty())),
            "toUpperCase" => Some(Value::String(s.to_uppercase())),
            "toLowerCase" => Some(Value::String(s.to_lowercase())),
            "trim" => Some(Value::String(s.trim().to_string())),
            _ => None,
        },
        Value::List(items) => match method {
            "size" => Some(Value::Integer(items.len() as i32)),
            "isEmpty" => Some(Value::Boolean(items.is_empty())),
            "first" => Some(items.first().cloned().unwrap_or(Value::Null)),
            "last" => Some(items.last().cloned().unwrap_or(Value::Null)),
            _ => None,
        },
        Value::Date(d) => match method {
            "getYear" | "year" => Some(Value::Integer(d.year())),
            "getMonth" | "month" => Some(Value::Integer(d.month() as i32)),
            "getDay" | "day" => Some(Value::Integer(d.day() as i32)),
            "getHour" | "hour" => Some(Value::Integer(d.hour() as i32)),
            "getMinute" | "minute" => Some(Value::Integer(d.minute() as i32)),
            "getSecond" | "second" => Some(Value::Integer(d.second() as i32)),
            "getTime" | "time" => Some(Value::Long(d.timestamp_millis())),
            _ => None,
        },
        v if v.is_numeric() => {
            let number = v.as_f64().unwrap_or_default();
            match method {
                "intValue" => Some(Value::Integer(number as i32)),
                "longValue" => Some(Value::Long(number as i64)),
                "doubleValue" => Some(Value::Double(number)),
                "floatValue" => Some(Value::Float(number as f32)),
                _ => None,
            }
        }
        _ => None,
    };

    found.ok_or_else(|| format!("{} has no accessor '{}'", target.type_name(), method))
}

fn object_accessor(target: &Value, method: &str) -> Result<Option<Value>, String> {
    let Value::Object(fields) = target else {
        return Ok(None);
    };

    if let Some(value) = fields.get(method) {
        return Ok(Some(value.clone()));
    }
    if let Some(field) = bean_property(method) {
        if let Some(value) = fields.get(&field) {
            return Ok(Some(value.clone()));
        }
    }
    if method == "size" {
        return Ok(Some(Value::Integer(fields.len() as i32)));
    }

    // dotted or indexed path into the object
    if method.contains('.') || method.contains('[') {
        let compiled = jmespath::compile(method)
            .map_err(|e| format!("invalid accessor path '{}': {}", method, e))?;
        let found = compiled
            .search(&target.to_json())
            .map_err(|e| format!("failed to evaluate accessor path '{}': {}", method, e))?;
        let json = serde_json::to_value(&*found)
            .map_err(|e| format!("failed to convert accessor result: {}", e))?;
        return Ok(Some(Value::from_json(&json)));
    }

    Ok(None)
}

/// `getTotal` / `isActive` to `total` / `active`
fn bean_property(method: &str) -> Option<String> {
    let rest = method
        .strip_prefix("get")
        .or_else(|| method.strip_prefix("is"))?;
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_uppercase() {
        return None;
    }
    Some(first.to_lowercase().chain(chars).collect())
}
