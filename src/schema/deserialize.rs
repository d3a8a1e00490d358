//! Top down conversion of transport values into their native forms.
use crate::{
    data_types::CodecContext,
    exception::Exception,
    schema::{Composite, Outcome, Schema},
    value::{Map, Value},
};
use ahash::AHashMap;

pub(crate) type Seen = AHashMap<(usize, usize), Value>;

impl Schema {
    /// Walk the schema tree over `value`, converting formatted scalars
    /// through the data type registry.
    pub fn deserialize(&self, value: &Value) -> Outcome {
        let exception = Exception::new("Unable to deserialize value");
        let mut seen = Seen::default();
        let result = deserialize_node(self, value, &exception, &mut seen);
        Outcome::from_error(result, exception)
    }
}

pub(crate) fn deserialize_node(
    schema: &Schema,
    value: &Value,
    exception: &Exception,
    seen: &mut Seen,
) -> Option<Value> {
    let value = match value {
        Value::Wrapped(inner) => (**inner).clone(),
        other => other.clone(),
    };

    if value.is_null() {
        if schema.nullable() || schema.type_name().is_none() {
            return Some(Value::Null);
        }
        exception.message("Value must not be null");
        return None;
    }

    if let Some(composite) = schema.composite() {
        return deserialize_composite(schema, &composite, &value, exception, seen);
    }

    let cycle_key = value.address().map(|address| (address, schema.id.0));
    if let Some(cycle_key) = &cycle_key {
        if let Some(cached) = seen.get(cycle_key) {
            return Some(cached.clone());
        }
    }

    match schema.type_name().as_deref() {
        Some("array") => {
            let items = match value.as_array() {
                Some(items) => items,
                None => {
                    exception.message("Expected an array");
                    return None;
                }
            };
            let result = Value::array(Vec::new());
            if let Some(cycle_key) = cycle_key {
                seen.insert(cycle_key, result.clone());
            }
            let target = result.as_array().expect("created as an array");
            let snapshot: Vec<Value> = items.borrow().clone();
            let item_schema = schema.items_schema();
            for (index, item) in snapshot.iter().enumerate() {
                match &item_schema {
                    Some(item_schema) => {
                        if let Some(converted) =
                            deserialize_node(item_schema, item, &exception.at(index), seen)
                        {
                            target.borrow_mut().push(converted);
                        }
                    }
                    None => target.borrow_mut().push(item.deep_copy()),
                }
            }
            Some(result)
        }
        Some("object") => {
            let map = match value.as_object() {
                Some(map) => map,
                None => {
                    exception.message("Expected an object");
                    return None;
                }
            };
            let result = Value::object(Map::new());
            if let Some(cycle_key) = cycle_key {
                seen.insert(cycle_key, result.clone());
            }
            let target = result.as_object().expect("created as an object");
            let snapshot: Map = map.borrow().clone();
            let additional = schema.prop("additionalProperties");
            for (key, item) in &snapshot {
                if let Some(property_schema) = schema.property_schema(key) {
                    if let Some(converted) =
                        deserialize_node(&property_schema, item, &exception.at(key.as_str()), seen)
                    {
                        target.borrow_mut().insert(key.clone(), converted);
                    }
                    continue;
                }
                match &additional {
                    // Extra keys are dropped when additional properties are
                    // forbidden; validation reports them.
                    Some(Value::Bool(false)) => {}
                    Some(Value::Component(_)) => {
                        let additional_schema = schema
                            .subschema(additional.as_ref().expect("checked above"))
                            .expect("component reference");
                        if let Some(converted) = deserialize_node(
                            &additional_schema,
                            item,
                            &exception.at(key.as_str()),
                            seen,
                        ) {
                            target.borrow_mut().insert(key.clone(), converted);
                        }
                    }
                    _ => {
                        target.borrow_mut().insert(key.clone(), item.deep_copy());
                    }
                }
            }
            Some(result)
        }
        Some(type_name @ ("boolean" | "integer" | "number" | "string")) => {
            if let Some(codec) = schema.codec() {
                let props = schema.props_map();
                return match (codec.deserialize)(&CodecContext { schema: &props }, &value) {
                    Ok(converted) => Some(converted),
                    Err(message) => {
                        exception.message(message);
                        None
                    }
                };
            }
            let matches = match type_name {
                "boolean" => matches!(value, Value::Bool(_)),
                "integer" => value.as_f64().map_or(false, |number| number.fract() == 0.0),
                "number" => matches!(value, Value::Number(_)),
                _ => matches!(value, Value::String(_)),
            };
            if matches {
                Some(value)
            } else {
                exception.message(format!("Expected a {}", type_name));
                None
            }
        }
        // `file` (v2) and untyped schemas pass values through untouched.
        _ => Some(value.deep_copy()),
    }
}

fn deserialize_composite(
    schema: &Schema,
    composite: &Composite,
    value: &Value,
    exception: &Exception,
    seen: &mut Seen,
) -> Option<Value> {
    match composite {
        Composite::AllOf(branches) => {
            let mut merged: Option<Value> = None;
            for branch in branches {
                let converted = deserialize_node(branch, value, exception, seen)?;
                merged = Some(match merged {
                    None => converted,
                    Some(existing) => merge_objects(existing, converted),
                });
            }
            merged
        }
        Composite::AnyOf(branches) | Composite::OneOf(branches) => {
            if schema.prop("discriminator").is_some() {
                if let Some(target) = schema.discriminate(value) {
                    return deserialize_node(&target, value, exception, seen);
                }
            }
            for branch in branches {
                let quiet = Exception::new("candidate");
                let mut branch_seen = Seen::default();
                let converted = deserialize_node(branch, value, &quiet, &mut branch_seen);
                if let (Some(converted), false) = (converted, quiet.has_exception()) {
                    if branch.validate(&converted).error.is_none() {
                        // First match wins.
                        return Some(converted);
                    }
                }
            }
            exception.message(match composite {
                Composite::OneOf(_) => "Value did not validate against exactly one oneOf schema",
                _ => "Value did not validate against any of the anyOf schemas",
            });
            None
        }
        // `not` constrains validation only.
        Composite::Not(_) => Some(value.deep_copy()),
    }
}

/// Union of two object results; keys produced by earlier branches win.
fn merge_objects(existing: Value, incoming: Value) -> Value {
    if let (Some(target), Some(source)) = (existing.as_object(), incoming.as_object()) {
        let snapshot: Map = source.borrow().clone();
        for (key, item) in snapshot {
            target.borrow_mut().entry(key).or_insert(item);
        }
    }
    existing
}
