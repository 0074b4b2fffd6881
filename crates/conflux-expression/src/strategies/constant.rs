use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::{EvaluationContext, ResolvedExpressions};
use crate::error::ExpressionError;
use crate::expression::{Expression, ExpressionKind};
use crate::strategy::ExpressionStrategy;
use crate::value::{ReturnType, Value};

// yyyy[-MM[-dd[(T| )HH[:mm[:ss[.fffffffff]]]]]][Z|+hh:mm|+hhmm]
static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:[T ](\d{2})(?::(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?)?)?)?)?(Z|[+-]\d{2}:?\d{2})?$",
    )
    .expect("date regex")
});

/// Literal parsed against the declared return type
pub struct ConstantStrategy;

impl ExpressionStrategy for ConstantStrategy {
    fn kind(&self) -> ExpressionKind {
        ExpressionKind::Constant
    }

    fn validate(&self, expression: &Expression) -> Result<(), ExpressionError> {
        match expression.return_type() {
            ReturnType::List | ReturnType::Object => Err(ExpressionError::invalid(
                expression,
                format!("constants cannot be of type {}", expression.return_type()),
            )),
            // an empty string is a legal constant
            ReturnType::String | ReturnType::Any => Ok(()),
            _ if expression.content().trim().is_empty() => Err(ExpressionError::invalid(
                expression,
                "content must not be empty",
            )),
            _ => Ok(()),
        }
    }

    fn evaluate(
        &self,
        expression: &Expression,
        _context: &EvaluationContext,
        _resolved: &ResolvedExpressions,
    ) -> Result<Value, ExpressionError> {
        let content = expression.content();
        let trimmed = content.trim();
        let parse_error = |type_name: &str| {
            ExpressionError::evaluation(
                expression,
                format!("'{}' is not a valid {}", content, type_name),
            )
        };

        match expression.return_type() {
            ReturnType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(parse_error("boolean")),
            },
            ReturnType::Integer => trimmed
                .parse::<i32>()
                .map(Value::Integer)
                .map_err(|_| parse_error("integer")),
            ReturnType::Long => trimmed
                .parse::<i64>()
                .map(Value::Long)
                .map_err(|_| parse_error("long")),
            ReturnType::Double => trimmed
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| parse_error("double")),
            ReturnType::Float => trimmed
                .parse::<f32>()
                .map(Value::Float)
                .map_err(|_| parse_error("float")),
            ReturnType::Number => trimmed
                .parse::<i64>()
                .map(Value::Long)
                .or_else(|_| trimmed.parse::<f64>().map(Value::Double))
                .map_err(|_| parse_error("number")),
            ReturnType::Date => parse_date(trimmed)
                .map(Value::Date)
                .ok_or_else(|| parse_error("date")),
            ReturnType::String | ReturnType::Any => Ok(Value::String(content.to_string())),
            ReturnType::List | ReturnType::Object => Err(ExpressionError::invalid(
                expression,
                format!("constants cannot be of type {}", expression.return_type()),
            )),
        }
    }
}

/// Parse an ISO-8601-like date field by field.
///
/// Missing fields default to the start of their range and a missing offset
/// means UTC.
fn parse_date(content: &str) -> Option<DateTime<Utc>> {
    let captures = DATE.captures(content)?;
    let field = |index: usize, default: u32| -> Option<u32> {
        match captures.get(index) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };

    let year: i32 = captures.get(1)?.as_str().parse().ok()?;
    let nanos = match captures.get(7) {
        // right-pad the fraction to nanoseconds
        Some(m) => format!("{:0<9}", m.as_str()).parse().ok()?,
        None => 0,
    };

    let naive = NaiveDate::from_ymd_opt(year, field(2, 1)?, field(3, 1)?)?
        .and_hms_nano_opt(field(4, 0)?, field(5, 0)?, field(6, 0)?, nanos)?;

    let offset = match captures.get(8).map(|m| m.as_str()) {
        None | Some("Z") => FixedOffset::east_opt(0)?,
        Some(raw) => {
            let sign = if raw.starts_with('-') { -1 } else { 1 };
            let digits: String = raw[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i32 = digits.get(0..2)?.parse().ok()?;
            let minutes: i32 = digits.get(2..4)?.parse().ok()?;
            FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?
        }
    };

    offset
        .from_local_datetime(&naive)
        .single()
        .map(|d| d.with_timezone(&Utc))
}
