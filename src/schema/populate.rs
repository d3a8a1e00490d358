//! Template driven value population.
use crate::{
    exception::Exception,
    schema::{Composite, Outcome, Schema},
    value::{Map, Value},
};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref COLON: Regex =
        Regex::new(r":([_$a-zA-Z][_$a-zA-Z0-9]*)").expect("Is a valid regex");
    static ref HANDLEBAR: Regex =
        Regex::new(r"\{([_$a-zA-Z][_$a-zA-Z0-9]*)\}").expect("Is a valid regex");
    static ref DOUBLE_HANDLEBAR: Regex =
        Regex::new(r"\{\{([_$a-zA-Z][_$a-zA-Z0-9]*)\}\}").expect("Is a valid regex");
}

/// Which template parameter style the injector scans for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Replacement {
    /// `{name}`
    Handlebar,
    /// `{{name}}`
    DoubleHandlebar,
    /// `:name`
    Colon,
}

/// Options accepted by [`Schema::populate`].
#[derive(Clone, Debug)]
pub struct PopulateOptions {
    /// Operate on a clone of the input value.
    pub copy: bool,
    /// Honor `x-condition` predicates.
    pub conditions: bool,
    /// Fill in schema defaults.
    pub defaults: bool,
    /// Expand templates found inside defaults.
    pub template_defaults: bool,
    /// Expand `x-template` strings.
    pub templates: bool,
    /// Substitute `x-variable` parameters.
    pub variables: bool,
    /// Maximum recursion depth.
    pub depth: usize,
    /// The injector in force.
    pub replacement: Replacement,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        PopulateOptions {
            copy: false,
            conditions: true,
            defaults: true,
            template_defaults: true,
            templates: true,
            variables: true,
            depth: 100,
            replacement: Replacement::Handlebar,
        }
    }
}

/// Single pass, left to right substitution. Unresolved references stay
/// verbatim; substituted text is never rescanned.
pub(crate) fn inject(text: &str, params: &Map, replacement: Replacement) -> String {
    let pattern: &Regex = match replacement {
        Replacement::Handlebar => &HANDLEBAR,
        Replacement::DoubleHandlebar => &DOUBLE_HANDLEBAR,
        Replacement::Colon => &COLON,
    };
    pattern
        .replace_all(text, |caps: &Captures<'_>| {
            match params.get(&caps[1]) {
                Some(param) => render_param(param),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn render_param(param: &Value) -> String {
    match param {
        Value::String(text) => text.clone(),
        other => other.to_json().to_string(),
    }
}

fn is_truthy(param: &Value) -> bool {
    match param {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(value) => value.as_f64() != Some(0.0),
        Value::String(value) => !value.is_empty(),
        _ => true,
    }
}

impl Schema {
    /// Recursively synthesize a value against this schema from a parameter
    /// map.
    pub fn populate(
        &self,
        params: &Map,
        value: Option<&Value>,
        options: PopulateOptions,
    ) -> Outcome {
        let exception = Exception::new("Unable to populate value");
        let initial = value.map(|value| {
            if options.copy {
                value.deep_copy()
            } else {
                value.clone()
            }
        });
        let result = populate_node(self, initial, params, &options, &exception, options.depth);
        Outcome::from_error(result, exception)
    }
}

fn populate_node(
    schema: &Schema,
    value: Option<Value>,
    params: &Map,
    options: &PopulateOptions,
    exception: &Exception,
    depth: usize,
) -> Option<Value> {
    if depth == 0 {
        exception.message("Maximum populate depth exceeded");
        return value;
    }

    if options.conditions {
        if let Some(condition) = schema.prop("x-condition").and_then(|v| v.as_str()) {
            let satisfied = params.get(&condition).map_or(false, is_truthy);
            if !satisfied {
                return value;
            }
        }
    }

    if let Some(composite) = schema.composite() {
        return match composite {
            Composite::AllOf(branches) => {
                let mut value = value;
                for branch in branches {
                    value = populate_node(&branch, value, params, options, exception, depth - 1);
                }
                value
            }
            Composite::AnyOf(_) | Composite::OneOf(_) => {
                // Population across alternatives requires a discriminator.
                match value
                    .as_ref()
                    .and_then(|value| schema.discriminate(value))
                {
                    Some(target) => {
                        populate_node(&target, value, params, options, exception, depth - 1)
                    }
                    None => value,
                }
            }
            Composite::Not(_) => value,
        };
    }

    if value.is_none() {
        if options.variables {
            if let Some(name) = schema.prop("x-variable").and_then(|v| v.as_str()) {
                if let Some(param) = params.get(&name) {
                    return Some(param.deep_copy());
                }
            }
        }
        if options.templates {
            if let Some(template) = schema.prop("x-template").and_then(|v| v.as_str()) {
                return Some(Value::String(inject(&template, params, options.replacement)));
            }
        }
        if options.defaults {
            if let Some(default) = schema.prop("default") {
                if let (true, Value::String(text)) = (options.template_defaults, &default) {
                    return Some(Value::String(inject(text, params, options.replacement)));
                }
                return Some(default.deep_copy());
            }
        }
    }

    match schema.type_name().as_deref() {
        Some("object") => {
            let target = match &value {
                Some(Value::Object(_)) => value.clone().expect("checked above"),
                Some(_) => return value,
                None => Value::object(Map::new()),
            };
            let map = target.as_object().expect("created as an object");
            if let Some(properties) = schema.prop("properties").and_then(|v| v.as_object()) {
                let entries: Vec<(String, Value)> = properties
                    .borrow()
                    .iter()
                    .map(|(key, item)| (key.clone(), item.clone()))
                    .collect();
                for (key, item) in entries {
                    if let Some(property_schema) = schema.subschema(&item) {
                        let existing = map.borrow().get(&key).cloned();
                        if let Some(populated) = populate_node(
                            &property_schema,
                            existing,
                            params,
                            options,
                            &exception.at(key.as_str()),
                            depth - 1,
                        ) {
                            map.borrow_mut().insert(key, populated);
                        }
                    }
                }
            }
            if value.is_none() && map.borrow().is_empty() {
                None
            } else {
                Some(target)
            }
        }
        Some("array") => {
            if let Some(Value::Array(items)) = &value {
                if let Some(item_schema) = schema.items_schema() {
                    let snapshot: Vec<Value> = items.borrow().clone();
                    for (index, item) in snapshot.into_iter().enumerate() {
                        if let Some(populated) = populate_node(
                            &item_schema,
                            Some(item),
                            params,
                            options,
                            &exception.at(index),
                            depth - 1,
                        ) {
                            items.borrow_mut()[index] = populated;
                        }
                    }
                }
            }
            value
        }
        _ => value,
    }
}
