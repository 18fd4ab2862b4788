use serde::Serialize;
use serde_json::{Map, Number, Value};
use serde_value::Value as SerdeValue;

/// Converts any serializable value into plain JSON: objects, arrays and scalars.
///
/// Structs and maps become objects, tuples, sets and sequences become arrays,
/// unit and `None` become `null`. Values JSON cannot carry (non-finite floats,
/// non-string map keys) are rendered as text. A value whose `Serialize` impl
/// fails is rendered as the error text.
pub fn normalize<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_value::to_value(value) {
        Ok(value) => serde_value_to_json(value),
        Err(error) => Value::String(error.to_string()),
    }
}

/// Re-normalizes an existing JSON value. Applying it twice is the same as once.
pub fn normalize_value(value: &Value) -> Value {
    normalize(value)
}

fn serde_value_to_json(value: SerdeValue) -> Value {
    match value {
        SerdeValue::Bool(v) => Value::Bool(v),
        SerdeValue::U8(v) => Value::from(v),
        SerdeValue::U16(v) => Value::from(v),
        SerdeValue::U32(v) => Value::from(v),
        SerdeValue::U64(v) => Value::from(v),
        SerdeValue::I8(v) => Value::from(v),
        SerdeValue::I16(v) => Value::from(v),
        SerdeValue::I32(v) => Value::from(v),
        SerdeValue::I64(v) => Value::from(v),
        SerdeValue::F32(v) => float_to_json(f64::from(v)),
        SerdeValue::F64(v) => float_to_json(v),
        SerdeValue::Char(c) => Value::String(c.to_string()),
        SerdeValue::String(s) => Value::String(s),
        SerdeValue::Unit => Value::Null,
        SerdeValue::Option(opt) => match opt {
            Some(inner) => serde_value_to_json(*inner),
            None => Value::Null,
        },
        SerdeValue::Newtype(inner) => serde_value_to_json(*inner),
        SerdeValue::Seq(items) => Value::Array(items.into_iter().map(serde_value_to_json).collect()),
        SerdeValue::Map(map) => {
            let mut object = Map::with_capacity(map.len());
            for (key, value) in map {
                object.insert(map_key_text(key), serde_value_to_json(value));
            }
            Value::Object(object)
        }
        SerdeValue::Bytes(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
    }
}

fn float_to_json(v: f64) -> Value {
    Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

fn map_key_text(key: SerdeValue) -> String {
    match key {
        SerdeValue::String(s) => s,
        SerdeValue::Char(c) => c.to_string(),
        other => match serde_value_to_json(other) {
            Value::String(s) => s,
            rendered => rendered.to_string(),
        },
    }
}
