//! Field to schema mapping
//!
//! [`map_field`] turns an introspected field into the Swagger schema fragment
//! used in definitions and per-field routes. [`coerce_value`] applies the
//! same type information to JSON values written through per-field PUT.

use crate::descriptor::ScalarType;
use crate::error::{Error, Result};
use crate::openapi::SchemaObject;
use crate::types::{FieldDescriptor, FieldKind};
use serde_json::{Number, Value};

/// JSON-schema kind of a protobuf scalar or well-known type
pub fn scalar_kind(scalar: ScalarType) -> FieldKind {
    match scalar {
        ScalarType::Int32
        | ScalarType::Int64
        | ScalarType::Sint32
        | ScalarType::Sint64
        | ScalarType::Sfixed32
        | ScalarType::Sfixed64
        | ScalarType::Uint32
        | ScalarType::Fixed32
        | ScalarType::Uint64
        | ScalarType::Fixed64 => FieldKind::Integer,
        ScalarType::Float | ScalarType::Double => FieldKind::Number,
        ScalarType::String
        | ScalarType::Bytes
        | ScalarType::Timestamp
        | ScalarType::Duration
        | ScalarType::FieldMask => FieldKind::String,
        ScalarType::Bool => FieldKind::Boolean,
        ScalarType::Struct | ScalarType::Value | ScalarType::ListValue | ScalarType::Any => {
            FieldKind::Json
        }
    }
}

/// Swagger `format` for a concrete protobuf type name, if any
pub fn format_for(concrete_type: &str) -> Option<&'static str> {
    match concrete_type {
        "int32" | "sint32" | "sfixed32" => Some("int32"),
        "int64" | "sint64" | "sfixed64" => Some("int64"),
        "uint32" | "fixed32" => Some("uint32"),
        "uint64" | "fixed64" => Some("uint64"),
        "float" => Some("float"),
        "double" => Some("double"),
        "bytes" => Some("byte"),
        "Timestamp" => Some("date-time"),
        "Duration" => Some("duration"),
        _ => None,
    }
}

/// Schema fragment for a field
pub fn map_field(field: &FieldDescriptor) -> SchemaObject {
    if let Some(value) = &field.map_value {
        return SchemaObject::map_of(map_field(value));
    }
    if field.is_repeated {
        return SchemaObject::array_of(map_field(&field.item()));
    }

    match field.kind {
        FieldKind::Object => SchemaObject::reference_to(&field.concrete_type),
        FieldKind::Json => match field.concrete_type.as_str() {
            "ListValue" => SchemaObject::array_of(SchemaObject::default()),
            "Value" => SchemaObject::default(),
            _ => SchemaObject::of_type("object"),
        },
        FieldKind::Enum => SchemaObject {
            schema_type: Some("string".to_string()),
            enum_values: Some(
                field
                    .enum_values
                    .iter()
                    .flatten()
                    .map(|v| Value::String(v.clone()))
                    .collect(),
            ),
            ..Default::default()
        },
        kind => {
            let schema = SchemaObject::of_type(kind.as_str());
            match format_for(&field.concrete_type) {
                Some(format) => schema.with_format(format),
                None => schema,
            }
        }
    }
}

/// Object schema for a whole message
pub fn map_message(fields: &[FieldDescriptor]) -> SchemaObject {
    fields.iter().fold(SchemaObject::of_type("object"), |schema, field| {
        schema.with_property(field.name.clone(), map_field(field))
    })
}

/// Coerce a JSON value written to a single request field
///
/// Numeric strings become numbers, `"true"`/`"false"` become booleans and
/// enum names are checked against the declared literals. Message-typed values
/// must be objects and replace the previous value wholesale. Maps are JSON
/// objects whose values are coerced one by one.
pub fn coerce_value(field: &FieldDescriptor, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    if let Some(entry) = &field.map_value {
        return match value {
            Value::Object(map) => map
                .into_iter()
                .map(|(key, v)| coerce_value(entry, v).map(|v| (key, v)))
                .collect::<Result<serde_json::Map<_, _>>>()
                .map(Value::Object),
            other => Err(mismatch(field, "an object", &other)),
        };
    }

    if field.is_repeated {
        let item = field.item();
        return match value {
            Value::Array(items) => items
                .into_iter()
                .map(|v| coerce_value(&item, v))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Err(mismatch(field, "an array", &other)),
        };
    }

    match field.kind {
        FieldKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
            Value::String(s) => parse_integer(s.trim())
                .map(Value::Number)
                .ok_or_else(|| mismatch(field, "an integer", &Value::String(s))),
            other => Err(mismatch(field, "an integer", &other)),
        },
        FieldKind::Number => match value {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch(field, "a number", &Value::String(s))),
            other => Err(mismatch(field, "a number", &other)),
        },
        FieldKind::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            other => Err(mismatch(field, "a boolean", &other)),
        },
        FieldKind::String => match value {
            Value::String(s) => Ok(Value::String(s)),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(field, "a string", &other)),
        },
        FieldKind::Enum => match value {
            Value::String(s) => {
                let known = field
                    .enum_values
                    .as_ref()
                    .map(|values| values.iter().any(|v| *v == s))
                    .unwrap_or(false);
                if known {
                    Ok(Value::String(s))
                } else {
                    Err(Error::InvalidRequest(format!(
                        "field '{}': '{}' is not a value of {}",
                        field.name, s, field.concrete_type
                    )))
                }
            }
            Value::Number(n) if n.is_i64() => Ok(Value::Number(n)),
            other => Err(mismatch(field, "an enum name", &other)),
        },
        FieldKind::Object => match value {
            Value::Object(map) => Ok(Value::Object(map)),
            other => Err(mismatch(field, "an object", &other)),
        },
        FieldKind::Json => match (field.concrete_type.as_str(), value) {
            ("Value", v) => Ok(v),
            ("ListValue", Value::Array(items)) => Ok(Value::Array(items)),
            ("ListValue", other) => Err(mismatch(field, "an array", &other)),
            (_, Value::Object(map)) => Ok(Value::Object(map)),
            (_, other) => Err(mismatch(field, "an object", &other)),
        },
    }
}

fn parse_integer(s: &str) -> Option<Number> {
    s.parse::<i64>()
        .map(Number::from)
        .or_else(|_| s.parse::<u64>().map(Number::from))
        .ok()
}

fn mismatch(field: &FieldDescriptor, expected: &str, got: &Value) -> Error {
    Error::InvalidRequest(format!(
        "field '{}' expects {}, got {}",
        field.name, expected, got
    ))
}
