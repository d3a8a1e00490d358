//! The value tree shared by raw definitions, normalized results and enforced
//! user data.
//!
//! `serde_json::Value` cannot express the shared (and possibly cyclic)
//! sub-trees produced by an external `$ref` resolver, nor the native values
//! produced by data type codecs (dates, binary buffers, compiled patterns).
//! This module owns a superset value type with identity-based cycle handling.
use crate::context::ComponentId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Number;
use std::{cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

/// Object storage. `BTreeMap` keeps key iteration deterministic.
pub type Map = BTreeMap<String, Value>;

/// A single node of a definition or an enforced value.
#[derive(Clone)]
pub enum Value {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(String),
    /// A date or date-time produced by the `date`/`date-time` codecs.
    Date(DateTime<Utc>),
    /// A binary buffer produced by the `byte`/`binary` codecs.
    Bytes(Rc<Vec<u8>>),
    /// A compiled `pattern`.
    Regex(Rc<fancy_regex::Regex>),
    /// An array. Shared so that resolved `$ref`s keep their identity.
    Array(Rc<RefCell<Vec<Value>>>),
    /// An object. Shared so that resolved `$ref`s keep their identity.
    Object(Rc<RefCell<Map>>),
    /// A materialized enforcer component within the arena.
    Component(ComponentId),
    /// An opaque marker: this value was produced by a known constructor.
    Wrapped(Rc<Value>),
}

/// The classification the normalizer dispatches on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DefinitionType {
    Array,
    Boolean,
    Null,
    Number,
    Object,
    String,
    Undefined,
}

impl fmt::Display for DefinitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionType::Array => f.write_str("array"),
            DefinitionType::Boolean => f.write_str("boolean"),
            DefinitionType::Null => f.write_str("null"),
            DefinitionType::Number => f.write_str("number"),
            DefinitionType::Object => f.write_str("object"),
            DefinitionType::String => f.write_str("string"),
            DefinitionType::Undefined => f.write_str("undefined"),
        }
    }
}

/// Tag identifying the native variants a data type codec may produce.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Constructor {
    Date,
    Bytes,
    Regex,
}

impl fmt::Display for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constructor::Date => f.write_str("Date"),
            Constructor::Bytes => f.write_str("Bytes"),
            Constructor::Regex => f.write_str("Regex"),
        }
    }
}

impl Value {
    /// Build an object value from a map.
    pub fn object(map: Map) -> Value {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    /// Build an array value from a vector.
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Wrap a value, marking it as produced by a known constructor.
    pub fn wrapped(value: Value) -> Value {
        Value::Wrapped(Rc::new(value))
    }

    /// Classification used by the normalizer. Native variants have no
    /// definition type and surface as "Unknown data type".
    pub fn definition_type(&self) -> Option<DefinitionType> {
        match self {
            Value::Null => Some(DefinitionType::Null),
            Value::Bool(_) => Some(DefinitionType::Boolean),
            Value::Number(_) => Some(DefinitionType::Number),
            Value::String(_) => Some(DefinitionType::String),
            Value::Array(_) => Some(DefinitionType::Array),
            Value::Object(_) => Some(DefinitionType::Object),
            Value::Date(_)
            | Value::Bytes(_)
            | Value::Regex(_)
            | Value::Component(_)
            | Value::Wrapped(_) => None,
        }
    }

    /// The identity of a shared node, used as a cycle key. Scalars have none.
    pub(crate) fn address(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(Rc::as_ptr(items) as usize),
            Value::Object(map) => Some(Rc::as_ptr(map) as *const u8 as usize),
            _ => None,
        }
    }

    /// The constructor tag of a native value.
    pub fn constructor(&self) -> Option<Constructor> {
        match self {
            Value::Date(_) => Some(Constructor::Date),
            Value::Bytes(_) => Some(Constructor::Bytes),
            Value::Regex(_) => Some(Constructor::Regex),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<String> {
        match self {
            Value::String(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Number(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) => value.as_f64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(value) => value.as_u64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<Rc<RefCell<Map>>> {
        match self {
            Value::Object(map) => Some(Rc::clone(map)),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<Rc<RefCell<Vec<Value>>>> {
        match self {
            Value::Array(items) => Some(Rc::clone(items)),
            _ => None,
        }
    }

    /// Read a property of an object value.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Read an element of an array value.
    pub fn index(&self, idx: usize) -> Option<Value> {
        match self {
            Value::Array(items) => items.borrow().get(idx).cloned(),
            _ => None,
        }
    }

    /// Copy a tree, preserving the sharing structure (a cyclic input yields a
    /// cyclic output with fresh identities).
    pub fn deep_copy(&self) -> Value {
        fn copy(value: &Value, seen: &mut ahash::AHashMap<usize, Value>) -> Value {
            match value {
                Value::Array(items) => {
                    let address = Rc::as_ptr(items) as usize;
                    if let Some(existing) = seen.get(&address) {
                        return existing.clone();
                    }
                    let target = Rc::new(RefCell::new(Vec::with_capacity(items.borrow().len())));
                    seen.insert(address, Value::Array(Rc::clone(&target)));
                    for item in items.borrow().iter() {
                        let copied = copy(item, seen);
                        target.borrow_mut().push(copied);
                    }
                    Value::Array(target)
                }
                Value::Object(map) => {
                    let address = Rc::as_ptr(map) as *const u8 as usize;
                    if let Some(existing) = seen.get(&address) {
                        return existing.clone();
                    }
                    let target = Rc::new(RefCell::new(Map::new()));
                    seen.insert(address, Value::Object(Rc::clone(&target)));
                    for (key, item) in map.borrow().iter() {
                        let copied = copy(item, seen);
                        target.borrow_mut().insert(key.clone(), copied);
                    }
                    Value::Object(target)
                }
                other => other.clone(),
            }
        }
        copy(self, &mut ahash::AHashMap::new())
    }

    /// Best effort conversion back to plain JSON. Native values render as
    /// their transport form, enforcer components as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        fn convert(value: &Value, seen: &mut Vec<usize>) -> serde_json::Value {
            if let Some(address) = value.address() {
                if seen.contains(&address) {
                    return serde_json::Value::Null;
                }
                seen.push(address);
            }
            let result = match value {
                Value::Null => serde_json::Value::Null,
                Value::Bool(value) => serde_json::Value::Bool(*value),
                Value::Number(value) => serde_json::Value::Number(value.clone()),
                Value::String(value) => serde_json::Value::String(value.clone()),
                Value::Date(value) => serde_json::Value::String(
                    value.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                Value::Bytes(value) => serde_json::Value::String(base64::encode(value.as_slice())),
                Value::Regex(value) => serde_json::Value::String(value.as_str().to_string()),
                Value::Array(items) => serde_json::Value::Array(
                    items.borrow().iter().map(|item| convert(item, seen)).collect(),
                ),
                Value::Object(map) => serde_json::Value::Object(
                    map.borrow()
                        .iter()
                        .map(|(key, item)| (key.clone(), convert(item, seen)))
                        .collect(),
                ),
                Value::Component(_) => serde_json::Value::Null,
                Value::Wrapped(inner) => convert(inner, seen),
            };
            if let Some(address) = value.address() {
                seen.retain(|seen_address| *seen_address != address);
            }
            result
        }
        convert(self, &mut Vec::new())
    }
}

/// Recursively strip [`Value::Wrapped`] markers.
pub fn extract_value(value: &Value) -> Value {
    fn extract(value: &Value, seen: &mut Vec<usize>) -> Value {
        match value {
            Value::Wrapped(inner) => extract(inner, seen),
            Value::Array(items) => {
                let address = Rc::as_ptr(items) as usize;
                if seen.contains(&address) {
                    return value.clone();
                }
                seen.push(address);
                let extracted = items
                    .borrow()
                    .iter()
                    .map(|item| extract(item, seen))
                    .collect();
                seen.pop();
                Value::array(extracted)
            }
            Value::Object(map) => {
                let address = Rc::as_ptr(map) as *const u8 as usize;
                if seen.contains(&address) {
                    return value.clone();
                }
                seen.push(address);
                let extracted = map
                    .borrow()
                    .iter()
                    .map(|(key, item)| (key.clone(), extract(item, seen)))
                    .collect();
                seen.pop();
                Value::object(extracted)
            }
            other => other.clone(),
        }
    }
    extract(value, &mut Vec::new())
}

/// Convert a value into a plain tree. Values whose constructor is registered
/// through a data type definition are preserved; anything else native is
/// rendered in its transport form. Plain trees pass through unchanged, so the
/// conversion is idempotent.
pub fn formalize(value: &Value) -> Value {
    fn convert(value: &Value, seen: &mut ahash::AHashMap<usize, Value>) -> Value {
        match value {
            Value::Wrapped(inner) => convert(inner, seen),
            Value::Date(_) | Value::Bytes(_) | Value::Regex(_) => {
                let constructor = value.constructor().expect("native variants have one");
                if crate::data_types::constructor_known(constructor) {
                    value.clone()
                } else {
                    Value::from(value.to_json())
                }
            }
            Value::Array(items) => {
                let address = Rc::as_ptr(items) as usize;
                if let Some(existing) = seen.get(&address) {
                    return existing.clone();
                }
                let target = Rc::new(RefCell::new(Vec::with_capacity(items.borrow().len())));
                seen.insert(address, Value::Array(Rc::clone(&target)));
                for item in items.borrow().iter() {
                    let converted = convert(item, seen);
                    target.borrow_mut().push(converted);
                }
                Value::Array(target)
            }
            Value::Object(map) => {
                let address = Rc::as_ptr(map) as *const u8 as usize;
                if let Some(existing) = seen.get(&address) {
                    return existing.clone();
                }
                let target = Rc::new(RefCell::new(Map::new()));
                seen.insert(address, Value::Object(Rc::clone(&target)));
                for (key, item) in map.borrow().iter() {
                    let converted = convert(item, seen);
                    target.borrow_mut().insert(key.clone(), converted);
                }
                Value::Object(target)
            }
            other => other.clone(),
        }
    }
    convert(value, &mut ahash::AHashMap::new())
}

/// Structural equality with numbers compared through `f64` and cycle
/// protection over identity pairs.
pub fn deep_equal(left: &Value, right: &Value) -> bool {
    fn eq(left: &Value, right: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
        match (left, right) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            (Value::Component(a), Value::Component(b)) => a == b,
            (Value::Wrapped(a), _) => eq(a, right, seen),
            (_, Value::Wrapped(b)) => eq(left, b, seen),
            (Value::Array(a), Value::Array(b)) => {
                let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
                if pair.0 == pair.1 || seen.contains(&pair) {
                    return true;
                }
                seen.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let result =
                    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| eq(x, y, seen));
                seen.pop();
                result
            }
            (Value::Object(a), Value::Object(b)) => {
                let pair = (
                    Rc::as_ptr(a) as *const u8 as usize,
                    Rc::as_ptr(b) as *const u8 as usize,
                );
                if pair.0 == pair.1 || seen.contains(&pair) {
                    return true;
                }
                seen.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let result = a.len() == b.len()
                    && a.iter().all(|(key, x)| {
                        b.get(key).map_or(false, |y| eq(x, y, seen))
                    });
                seen.pop();
                result
            }
            _ => false,
        }
    }
    eq(left, right, &mut Vec::new())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_equal(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn render(
            value: &Value,
            f: &mut fmt::Formatter<'_>,
            seen: &mut Vec<usize>,
        ) -> fmt::Result {
            if let Some(address) = value.address() {
                if seen.contains(&address) {
                    return f.write_str("<cycle>");
                }
                seen.push(address);
            }
            let result = match value {
                Value::Null => f.write_str("null"),
                Value::Bool(inner) => write!(f, "{}", inner),
                Value::Number(inner) => write!(f, "{}", inner),
                Value::String(inner) => write!(f, "{:?}", inner),
                Value::Date(inner) => write!(f, "Date({})", inner.to_rfc3339()),
                Value::Bytes(inner) => write!(f, "Bytes(len={})", inner.len()),
                Value::Regex(inner) => write!(f, "Regex({:?})", inner.as_str()),
                Value::Component(id) => write!(f, "Component({})", id.0),
                Value::Wrapped(inner) => {
                    f.write_str("Wrapped(")?;
                    render(inner, f, seen)?;
                    f.write_str(")")
                }
                Value::Array(items) => {
                    f.write_str("[")?;
                    for (idx, item) in items.borrow().iter().enumerate() {
                        if idx > 0 {
                            f.write_str(", ")?;
                        }
                        render(item, f, seen)?;
                    }
                    f.write_str("]")
                }
                Value::Object(map) => {
                    f.write_str("{")?;
                    for (idx, (key, item)) in map.borrow().iter().enumerate() {
                        if idx > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{:?}: ", key)?;
                        render(item, f, seen)?;
                    }
                    f.write_str("}")
                }
            };
            if let Some(address) = value.address() {
                seen.retain(|seen_address| *seen_address != address);
            }
            result
        }
        render(self, f, &mut Vec::new())
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(inner) => Value::Bool(*inner),
            serde_json::Value::Number(inner) => Value::Number(inner.clone()),
            serde_json::Value::String(inner) => Value::String(inner.clone()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(key, item)| (key.clone(), Value::from(item)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from(&value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::{deep_equal, extract_value, DefinitionType, Value};
    use serde_json::json;

    #[test]
    fn definition_types() {
        assert_eq!(
            Value::from(json!({})).definition_type(),
            Some(DefinitionType::Object)
        );
        assert_eq!(
            Value::from(json!([1])).definition_type(),
            Some(DefinitionType::Array)
        );
        assert_eq!(
            Value::Date(chrono::Utc::now()).definition_type(),
            None
        );
    }

    #[test]
    fn deep_equal_ignores_number_representation() {
        assert!(deep_equal(
            &Value::from(json!({"a": 1.0})),
            &Value::from(json!({"a": 1}))
        ));
    }

    #[test]
    fn deep_equal_handles_cycles() {
        let a = Value::object(Default::default());
        if let Value::Object(map) = &a {
            map.borrow_mut().insert("self".to_string(), a.clone());
        }
        let b = a.deep_copy();
        assert_ne!(a.address(), b.address());
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn deep_copy_preserves_sharing() {
        let shared = Value::from(json!({"x": 1}));
        let outer = Value::object(
            [
                ("a".to_string(), shared.clone()),
                ("b".to_string(), shared),
            ]
            .into_iter()
            .collect(),
        );
        let copied = outer.deep_copy();
        let a = copied.get("a").unwrap().address();
        let b = copied.get("b").unwrap().address();
        assert_eq!(a, b);
    }

    #[test]
    fn extract_value_unwraps() {
        let wrapped = Value::wrapped(Value::from("secret"));
        assert_eq!(extract_value(&wrapped), Value::from("secret"));
    }

    #[test]
    fn json_round_trip() {
        let source = json!({"a": [1, "two", null, true], "b": {"c": 1.5}});
        assert_eq!(Value::from(&source).to_json(), source);
    }
}
