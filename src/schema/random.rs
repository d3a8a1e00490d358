//! Random generation of schema conforming values.
use crate::{
    data_types::CodecContext,
    exception::Exception,
    schema::{validate::is_multiple_of, Composite, Outcome, Schema},
    value::{deep_equal, Map, Value},
};
use rand::{distributions::Alphanumeric, Rng, RngCore};
use thiserror::Error;

/// Rejected option values. The possibility options must lie within `[0, 1]`.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("Option {name} must be between 0 and 1 inclusive. Received: {value}")]
    PossibilityOutOfRange { name: &'static str, value: f64 },
}

/// Options accepted by [`Schema::random`].
#[derive(Clone, Debug)]
pub struct RandomOptions {
    /// Chance of adding a property not named by the schema.
    pub additional_properties_possibility: f64,
    /// Chance of using the declared default.
    pub default_possibility: f64,
    /// Chance of including each optional property.
    pub defined_property_possibility: f64,
    /// Additional elements beyond `minItems`.
    pub array_variation: u64,
    /// Range above `minimum` for generated numbers.
    pub number_variation: u64,
    pub max_depth: usize,
    pub unique_item_retry: usize,
    pub copy: bool,
}

impl Default for RandomOptions {
    fn default() -> Self {
        RandomOptions {
            additional_properties_possibility: 0.0,
            default_possibility: 0.25,
            defined_property_possibility: 0.80,
            array_variation: 4,
            number_variation: 1000,
            max_depth: 10,
            unique_item_retry: 5,
            copy: false,
        }
    }
}

impl RandomOptions {
    fn check(&self) -> Result<(), OptionsError> {
        for (name, value) in [
            (
                "additionalPropertiesPossibility",
                self.additional_properties_possibility,
            ),
            ("defaultPossibility", self.default_possibility),
            (
                "definedPropertyPossibility",
                self.defined_property_possibility,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OptionsError::PossibilityOutOfRange { name, value });
            }
        }
        Ok(())
    }
}

impl Schema {
    /// Generate a value conforming to this schema. An existing object value
    /// is kept and only its missing parts are filled in.
    pub fn random(
        &self,
        value: Option<&Value>,
        options: RandomOptions,
    ) -> Result<Outcome, OptionsError> {
        options.check()?;
        let mut rng = rand::thread_rng();
        Ok(self.random_with(value, &options, &mut rng))
    }

    /// Deterministic seam: the same schema, seed and options produce the same
    /// value.
    pub fn random_with(
        &self,
        value: Option<&Value>,
        options: &RandomOptions,
        rng: &mut dyn RngCore,
    ) -> Outcome {
        let exception = Exception::new("Unable to generate random value");
        let warning = Exception::new("One or more warnings encountered while generating");
        let initial = value.map(|value| {
            if options.copy {
                value.deep_copy()
            } else {
                value.clone()
            }
        });
        let result = random_node(
            self,
            initial,
            options,
            rng,
            &exception,
            &warning,
            options.max_depth,
        );
        Outcome::collect(result, exception, warning)
    }
}

fn random_node(
    schema: &Schema,
    value: Option<Value>,
    options: &RandomOptions,
    rng: &mut dyn RngCore,
    exception: &Exception,
    warning: &Exception,
    depth: usize,
) -> Option<Value> {
    if depth == 0 {
        return value;
    }

    if let Some(composite) = schema.composite() {
        return match composite {
            Composite::AllOf(branches) => {
                let mut value = value;
                for branch in branches {
                    value =
                        random_node(&branch, value, options, rng, exception, warning, depth - 1);
                }
                value
            }
            Composite::AnyOf(branches) | Composite::OneOf(branches) => {
                if branches.is_empty() {
                    return value;
                }
                let pick = rng.gen_range(0..branches.len());
                random_node(
                    &branches[pick],
                    value,
                    options,
                    rng,
                    exception,
                    warning,
                    depth - 1,
                )
            }
            Composite::Not(_) => value,
        };
    }

    if let Some(existing) = &value {
        if !matches!(existing, Value::Object(_)) {
            return value;
        }
    }

    if value.is_none() {
        if let Some(default) = schema.prop("default") {
            if rng.gen_bool(options.default_possibility) {
                return Some(default.deep_copy());
            }
        }
        if let Some(allowed) = schema.prop("enum").and_then(|v| v.as_array()) {
            let allowed = allowed.borrow();
            if !allowed.is_empty() {
                return Some(allowed[rng.gen_range(0..allowed.len())].deep_copy());
            }
        }
        if let Some(codec) = schema.codec() {
            if let Some(random) = codec.random {
                let props = schema.props_map();
                return match random(&CodecContext { schema: &props }, rng) {
                    Ok(generated) => Some(generated),
                    Err(message) => {
                        exception.message(message);
                        None
                    }
                };
            }
        }
    }

    match schema.type_name().as_deref() {
        Some("boolean") => Some(Value::Bool(rng.gen_bool(0.5))),
        Some("integer") => Some(random_integer(schema, options, rng)),
        Some("number") => Some(random_number(schema, options, rng)),
        Some("string") => Some(random_string(schema, options, rng)),
        Some("array") => random_array(schema, options, rng, exception, warning, depth),
        Some("object") => random_object(schema, value, options, rng, exception, warning, depth),
        _ => value,
    }
}

fn bound(schema: &Schema, key: &str) -> Option<f64> {
    schema.prop(key).and_then(|value| value.as_f64())
}

fn random_integer(schema: &Schema, options: &RandomOptions, rng: &mut dyn RngCore) -> Value {
    let exclusive_minimum = schema
        .prop("exclusiveMinimum")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let exclusive_maximum = schema
        .prop("exclusiveMaximum")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let variation = options.number_variation as i64;
    let minimum = bound(schema, "minimum");
    let maximum = bound(schema, "maximum");
    let mut low = minimum
        .map(|m| m.ceil() as i64)
        .unwrap_or_else(|| maximum.map_or(0, |m| m.floor() as i64 - variation));
    let mut high = maximum
        .map(|m| m.floor() as i64)
        .unwrap_or(low + variation);
    if exclusive_minimum {
        low += 1;
    }
    if exclusive_maximum {
        high -= 1;
    }
    if let Some(multiple_of) = bound(schema, "multipleOf").filter(|m| *m > 0.0) {
        let first = (low as f64 / multiple_of).ceil() as i64;
        let last = (high as f64 / multiple_of).floor() as i64;
        if first <= last {
            let k = rng.gen_range(first..=last);
            return Value::from((k as f64 * multiple_of) as i64);
        }
    }
    if low >= high {
        return Value::from(low);
    }
    Value::from(rng.gen_range(low..=high))
}

fn random_number(schema: &Schema, options: &RandomOptions, rng: &mut dyn RngCore) -> Value {
    let variation = options.number_variation as f64;
    let minimum = bound(schema, "minimum");
    let maximum = bound(schema, "maximum");
    let low = minimum.unwrap_or_else(|| maximum.map_or(0.0, |m| m - variation));
    let high = maximum.unwrap_or(low + variation);
    if let Some(multiple_of) = bound(schema, "multipleOf").filter(|m| *m > 0.0) {
        let first = (low / multiple_of).ceil() as i64;
        let last = (high / multiple_of).floor() as i64;
        if first <= last {
            let k = rng.gen_range(first..=last) as f64;
            let candidate = k * multiple_of;
            if is_multiple_of(candidate, multiple_of) {
                return Value::from(candidate);
            }
        }
    }
    if low >= high {
        return Value::from(low);
    }
    // Stay clear of the open ends so that exclusive bounds hold.
    let generated = low + (high - low) * rng.gen_range(0.01..0.99);
    Value::from(generated)
}

fn random_string(schema: &Schema, _: &RandomOptions, rng: &mut dyn RngCore) -> Value {
    let mut min_length = schema
        .prop("minLength")
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    let max_length = schema
        .prop("maxLength")
        .and_then(|v| v.as_u64())
        .unwrap_or(min_length + 24);
    if min_length > max_length {
        min_length = max_length;
    }
    let length = rng.gen_range(min_length..=max_length) as usize;
    let text: String = std::iter::repeat_with(|| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect();
    Value::String(text)
}

fn random_array(
    schema: &Schema,
    options: &RandomOptions,
    rng: &mut dyn RngCore,
    exception: &Exception,
    warning: &Exception,
    depth: usize,
) -> Option<Value> {
    let min_items = schema.prop("minItems").and_then(|v| v.as_u64()).unwrap_or(0);
    let max_items = schema
        .prop("maxItems")
        .and_then(|v| v.as_u64())
        .unwrap_or(min_items + options.array_variation);
    let count = if max_items > min_items {
        rng.gen_range(min_items..=max_items)
    } else {
        min_items
    };
    let unique = schema
        .prop("uniqueItems")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let item_schema = schema.items_schema();
    let mut items: Vec<Value> = Vec::with_capacity(count as usize);
    for index in 0..count {
        let item_schema = match &item_schema {
            Some(item_schema) => item_schema,
            None => break,
        };
        let mut retries = options.unique_item_retry;
        loop {
            let generated = random_node(
                item_schema,
                None,
                options,
                rng,
                &exception.at(index as usize),
                &warning.at(index as usize),
                depth - 1,
            );
            let generated = match generated {
                Some(generated) => generated,
                None => break,
            };
            let duplicate = unique && items.iter().any(|item| deep_equal(item, &generated));
            if !duplicate {
                items.push(generated);
                break;
            }
            if retries == 0 {
                break;
            }
            retries -= 1;
        }
    }
    // Distinct values may run dry before minItems is reached; what was
    // produced still comes back.
    if unique && (items.len() as u64) < min_items {
        warning.message(format!(
            "Unable to generate {} unique items",
            min_items
        ));
    }
    Some(Value::array(items))
}

fn random_object(
    schema: &Schema,
    value: Option<Value>,
    options: &RandomOptions,
    rng: &mut dyn RngCore,
    exception: &Exception,
    warning: &Exception,
    depth: usize,
) -> Option<Value> {
    let target = match &value {
        Some(Value::Object(_)) => value.clone().expect("checked above"),
        _ => Value::object(Map::new()),
    };
    let map = target.as_object().expect("created as an object");
    let required: Vec<String> = schema
        .prop("required")
        .and_then(|v| v.as_array())
        .map(|names| {
            names
                .borrow()
                .iter()
                .filter_map(|name| name.as_str())
                .collect()
        })
        .unwrap_or_default();
    if let Some(properties) = schema.prop("properties").and_then(|v| v.as_object()) {
        let entries: Vec<(String, Value)> = properties
            .borrow()
            .iter()
            .map(|(key, item)| (key.clone(), item.clone()))
            .collect();
        for (key, item) in entries {
            if map.borrow().contains_key(&key) {
                continue;
            }
            let include = required.contains(&key)
                || rng.gen_bool(options.defined_property_possibility);
            if !include {
                continue;
            }
            if let Some(property_schema) = schema.subschema(&item) {
                if let Some(generated) = random_node(
                    &property_schema,
                    None,
                    options,
                    rng,
                    &exception.at(key.as_str()),
                    &warning.at(key.as_str()),
                    depth - 1,
                ) {
                    map.borrow_mut().insert(key, generated);
                }
            }
        }
    }
    let additional = schema.prop("additionalProperties");
    let additional_schema = additional
        .as_ref()
        .and_then(|value| schema.subschema(value));
    let additional_allowed = !matches!(additional, Some(Value::Bool(false)));
    // Required names the properties table does not define still have to be
    // present; they ride on the additional properties schema.
    if additional_allowed {
        for name in &required {
            if map.borrow().contains_key(name) || schema.property_schema(name).is_some() {
                continue;
            }
            let generated = match &additional_schema {
                Some(additional_schema) => random_node(
                    additional_schema,
                    None,
                    options,
                    rng,
                    &exception.at(name.as_str()),
                    &warning.at(name.as_str()),
                    depth - 1,
                ),
                None => Some(random_string(schema, options, rng)),
            };
            if let Some(generated) = generated {
                map.borrow_mut().insert(name.clone(), generated);
            }
        }
    }
    if options.additional_properties_possibility > 0.0 && additional_allowed {
        for _ in 0..8 {
            if !rng.gen_bool(options.additional_properties_possibility) {
                break;
            }
            let name: String = std::iter::repeat_with(|| rng.sample(Alphanumeric) as char)
                .take(8)
                .collect();
            let generated = match &additional_schema {
                Some(additional_schema) => random_node(
                    additional_schema,
                    None,
                    options,
                    rng,
                    &exception.at(name.as_str()),
                    &warning.at(name.as_str()),
                    depth - 1,
                ),
                None => Some(random_string(schema, options, rng)),
            };
            if let Some(generated) = generated {
                map.borrow_mut().insert(name, generated);
            }
        }
    }
    Some(target)
}
