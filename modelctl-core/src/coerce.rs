//! # Value Coercion
//!
//! Users type every value as text. This module converts that text into the value a field's
//! [`FieldKind`] requires, both for field assignments ([`coerce_value`]) and for filter
//! predicates ([`coerce_filter_value`], [`build_predicate`]).
use crate::query::{FieldPredicate, FilterValue, QueryError, decode_operator};
use crate::schema::{FieldKind, FieldSchema};
use prost::bytes::Bytes;
use prost_reflect::{DynamicMessage, Value};

#[derive(Debug, thiserror::Error)]
pub enum CoercionError {
    #[error("Failed to convert '{value}' to {kind} for field {field}: {reason}")]
    TypeConversion {
        field: String,
        value: String,
        kind: String,
        reason: String,
    },
    #[error("{reason} (field {field})")]
    UnsupportedFilter { field: String, reason: &'static str },
    #[error("Field {0} holds multiple values and can't be assigned from text")]
    RepeatedField(String),
}

impl CoercionError {
    /// Failures caused by what the user asked for rather than by a value that should have parsed.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CoercionError::UnsupportedFilter { .. } | CoercionError::RepeatedField(_)
        )
    }
}

fn conversion_error(field: &FieldSchema, value: &str, reason: impl ToString) -> CoercionError {
    CoercionError::TypeConversion {
        field: field.name.clone(),
        value: value.to_string(),
        kind: field.kind.to_string(),
        reason: reason.to_string(),
    }
}

/// Converts `text` into a value assignable to `field`.
pub fn coerce_value(field: &FieldSchema, text: &str) -> Result<Value, CoercionError> {
    if field.repeated {
        return Err(CoercionError::RepeatedField(field.name.clone()));
    }

    let fail = |reason: &dyn ToString| conversion_error(field, text, reason.to_string());

    let value = match &field.kind {
        FieldKind::Integer { bits: 32, signed: true } => {
            Value::I32(text.parse().map_err(|e| fail(&e))?)
        }
        FieldKind::Integer { signed: true, .. } => Value::I64(text.parse().map_err(|e| fail(&e))?),
        FieldKind::Integer { bits: 32, signed: false } => {
            Value::U32(text.parse().map_err(|e| fail(&e))?)
        }
        FieldKind::Integer { .. } => Value::U64(text.parse().map_err(|e| fail(&e))?),
        FieldKind::Floating { bits: 32 } => Value::F32(text.parse().map_err(|e| fail(&e))?),
        FieldKind::Floating { .. } => Value::F64(text.parse().map_err(|e| fail(&e))?),
        FieldKind::Boolean => Value::Bool(
            text.to_ascii_lowercase()
                .parse()
                .map_err(|e| fail(&e))?,
        ),
        FieldKind::String => Value::String(text.to_string()),
        FieldKind::Bytes => Value::Bytes(Bytes::copy_from_slice(text.as_bytes())),
        FieldKind::Enum(descriptor) => match descriptor.get_value_by_name(text) {
            Some(value) => Value::EnumNumber(value.number()),
            None => Value::EnumNumber(
                text.parse()
                    .map_err(|_| fail(&format!("not a value of {}", descriptor.full_name())))?,
            ),
        },
        FieldKind::Message(descriptor) => {
            let mut deserializer = serde_json::Deserializer::from_str(text);
            let message = DynamicMessage::deserialize(descriptor.clone(), &mut deserializer)
                .map_err(|e| fail(&e))?;
            Value::Message(message)
        }
    };

    Ok(value)
}

/// Converts `text` into the value of a filter element.
///
/// Integers of up to 32 bits are compared numerically. Floating point fields can't be filtered
/// on. Every other kind is compared as text by the server.
pub fn coerce_filter_value(field: &FieldSchema, text: &str) -> Result<FilterValue, CoercionError> {
    match &field.kind {
        FieldKind::Integer { bits: 32, signed } => {
            let parsed = if *signed {
                text.parse::<i32>().map(i64::from)
            } else {
                text.parse::<u32>().map(i64::from)
            };
            parsed
                .map(FilterValue::Integer)
                .map_err(|e| conversion_error(field, text, e))
        }
        FieldKind::Floating { .. } => Err(CoercionError::UnsupportedFilter {
            field: field.name.clone(),
            reason: "Floating point filters are unsupported",
        }),
        _ => Ok(FilterValue::Text(text.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PredicateError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Coercion(#[from] CoercionError),
}

/// Builds a predicate from the raw text of one query clause.
pub fn build_predicate(field: &FieldSchema, raw: &str) -> Result<FieldPredicate, PredicateError> {
    let decoded = decode_operator(raw)?;
    let value = coerce_filter_value(field, &decoded.value)?;

    Ok(FieldPredicate {
        name: field.name.clone(),
        operator: decoded.operator,
        invert: decoded.invert,
        value,
    })
}

/// Renders a field value as text, the inverse of [`coerce_value`] for scalar kinds.
pub fn render_value(kind: &FieldKind, value: &Value) -> String {
    match value {
        Value::Bool(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U32(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F32(v) => v.to_string(),
        Value::F64(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
        Value::EnumNumber(n) => match kind {
            FieldKind::Enum(descriptor) => descriptor
                .get_value(*n)
                .map(|v| v.name().to_string())
                .unwrap_or_else(|| n.to_string()),
            _ => n.to_string(),
        },
        Value::Message(message) => serde_json::to_string(message).unwrap_or_default(),
        Value::List(items) => {
            let rendered: Vec<String> = items.iter().map(|v| render_value(kind, v)).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Map(map) => format!("{{{} entries}}", map.len()),
    }
}
