//! The constraint battery applied by [`Schema::validate`].
use crate::{
    data_types::CodecContext,
    exception::Exception,
    schema::{Composite, Outcome, Schema},
    value::{deep_equal, Value},
};
use ahash::AHashSet;
use fraction::{BigFraction, BigUint};
use num_cmp::NumCmp;

type SeenSet = AHashSet<(usize, usize)>;

#[derive(Clone, Copy)]
pub(crate) struct ValidateOptions {
    /// Bound checks are skipped when the meta validator validates the bound
    /// values themselves, which would otherwise recurse.
    pub(crate) max_min: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        ValidateOptions { max_min: true }
    }
}

impl Schema {
    /// Apply every constraint reachable from this schema to `value`.
    pub fn validate(&self, value: &Value) -> Outcome {
        self.validate_with(value, ValidateOptions::default())
    }

    pub(crate) fn validate_with(&self, value: &Value, options: ValidateOptions) -> Outcome {
        let exception = Exception::new("Invalid value");
        let warning = Exception::new("One or more warnings encountered while validating");
        let mut seen = SeenSet::default();
        validate_node(self, value, &exception, &warning, options, &mut seen);
        Outcome::collect(None, exception, warning)
    }
}

fn validate_node(
    schema: &Schema,
    value: &Value,
    exception: &Exception,
    warning: &Exception,
    options: ValidateOptions,
    seen: &mut SeenSet,
) {
    let value = match value {
        Value::Wrapped(inner) => (**inner).clone(),
        other => other.clone(),
    };

    if value.is_null() {
        if !schema.nullable() && schema.type_name().is_some() {
            exception.message("Value must not be null");
        }
        return;
    }

    // Deprecated schemas accept the value but the usage is reported.
    if schema
        .prop("deprecated")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        warning.message("Value uses a deprecated schema");
    }

    if let Some(composite) = schema.composite() {
        validate_composite(schema, &composite, &value, exception, warning, options, seen);
    }

    // A shared node already under validation against this schema passes;
    // the first visit carries the verdict.
    if let Some(address) = value.address() {
        if !seen.insert((address, schema.id.0)) {
            return;
        }
    }

    // Type conformance, through the codec when a format owns the value.
    if let Some(codec) = schema.codec() {
        let props = schema.props_map();
        if let Err(message) = (codec.validate)(&CodecContext { schema: &props }, &value) {
            exception.message(message);
            return;
        }
    } else if let Some(type_name) = schema.type_name() {
        let matches = match type_name.as_str() {
            "array" => matches!(value, Value::Array(_)),
            "boolean" => matches!(value, Value::Bool(_)),
            "integer" => value.as_f64().map_or(false, |number| number.fract() == 0.0),
            "number" => matches!(value, Value::Number(_)),
            "object" => matches!(value, Value::Object(_)),
            "string" | "file" => matches!(value, Value::String(_)),
            _ => true,
        };
        if !matches {
            exception.message(format!("Expected a {}", type_name));
            return;
        }
    }

    if let Some(allowed) = schema.prop("enum").and_then(|value| value.as_array()) {
        let member = allowed
            .borrow()
            .iter()
            .any(|option| deep_equal(option, &value));
        if !member {
            let rendered = allowed
                .borrow()
                .iter()
                .map(|option| option.to_json().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            exception.message(format!("Value must be one of: {}", rendered));
        }
    }

    if options.max_min {
        validate_bounds(schema, &value, exception);
    }
    validate_integer_format(schema, &value, exception);

    if let Value::String(text) = &value {
        let length = text.chars().count() as u64;
        if let Some(max_length) = schema.prop("maxLength").and_then(|v| v.as_u64()) {
            if length > max_length {
                exception.message(format!(
                    "Value must have length less than or equal to {}",
                    max_length
                ));
            }
        }
        if let Some(min_length) = schema.prop("minLength").and_then(|v| v.as_u64()) {
            if length < min_length {
                exception.message(format!(
                    "Value must have length greater than or equal to {}",
                    min_length
                ));
            }
        }
        if let Some(Value::Regex(pattern)) = schema.prop("pattern") {
            if !pattern.is_match(text).unwrap_or(false) {
                exception.message(format!(
                    "Value does not match required pattern: {}",
                    pattern.as_str()
                ));
            }
        }
    }

    if let Value::Array(items) = &value {
        let snapshot: Vec<Value> = items.borrow().clone();
        let count = snapshot.len() as u64;
        if let Some(max_items) = schema.prop("maxItems").and_then(|v| v.as_u64()) {
            if count > max_items {
                exception.message(format!(
                    "Array must contain at most {} items",
                    max_items
                ));
            }
        }
        if let Some(min_items) = schema.prop("minItems").and_then(|v| v.as_u64()) {
            if count < min_items {
                exception.message(format!(
                    "Array must contain at least {} items",
                    min_items
                ));
            }
        }
        let unique = schema
            .prop("uniqueItems")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if unique {
            for second in 1..snapshot.len() {
                // Deep equality: equal but non identical objects collide too.
                if snapshot[..second]
                    .iter()
                    .any(|first| deep_equal(first, &snapshot[second]))
                {
                    exception.at(second).message("Array items must be unique");
                }
            }
        }
        if let Some(item_schema) = schema.items_schema() {
            for (index, item) in snapshot.iter().enumerate() {
                validate_node(
                    &item_schema,
                    item,
                    &exception.at(index),
                    &warning.at(index),
                    options,
                    seen,
                );
            }
        }
    }

    if let Value::Object(map) = &value {
        let snapshot = map.borrow().clone();
        if let Some(required) = schema.prop("required").and_then(|v| v.as_array()) {
            for name in required.borrow().iter() {
                if let Some(name) = name.as_str() {
                    if !snapshot.contains_key(&name) {
                        exception.message(format!("Missing required property: {}", name));
                    }
                }
            }
        }
        if let Some(discriminator) = schema.prop("discriminator") {
            let key = match discriminator {
                Value::String(key) => Some(key),
                Value::Component(id) => schema
                    .graph
                    .prop(id, "propertyName")
                    .and_then(|v| v.as_str()),
                _ => None,
            };
            if let Some(key) = key {
                if !snapshot.contains_key(&key) {
                    exception.message(format!(
                        "Missing required discriminator property: {}",
                        key
                    ));
                }
            }
        }
        let count = snapshot.len() as u64;
        if let Some(max_properties) = schema.prop("maxProperties").and_then(|v| v.as_u64()) {
            if count > max_properties {
                exception.message(format!(
                    "Object must contain at most {} properties",
                    max_properties
                ));
            }
        }
        if let Some(min_properties) = schema.prop("minProperties").and_then(|v| v.as_u64()) {
            if count < min_properties {
                exception.message(format!(
                    "Object must contain at least {} properties",
                    min_properties
                ));
            }
        }
        let additional = schema.prop("additionalProperties");
        for (key, item) in &snapshot {
            if let Some(property_schema) = schema.property_schema(key) {
                validate_node(
                    &property_schema,
                    item,
                    &exception.at(key.as_str()),
                    &warning.at(key.as_str()),
                    options,
                    seen,
                );
                continue;
            }
            match &additional {
                Some(Value::Bool(false)) => {
                    exception.at(key.as_str()).message("Property not allowed");
                }
                Some(Value::Component(_)) => {
                    if let Some(additional_schema) = additional
                        .as_ref()
                        .and_then(|value| schema.subschema(value))
                    {
                        validate_node(
                            &additional_schema,
                            item,
                            &exception.at(key.as_str()),
                            &warning.at(key.as_str()),
                            options,
                            seen,
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

fn validate_composite(
    schema: &Schema,
    composite: &Composite,
    value: &Value,
    exception: &Exception,
    warning: &Exception,
    options: ValidateOptions,
    seen: &mut SeenSet,
) {
    match composite {
        Composite::AllOf(branches) => {
            for branch in branches {
                validate_node(branch, value, exception, warning, options, seen);
            }
        }
        Composite::AnyOf(branches) | Composite::OneOf(branches) => {
            if schema.prop("discriminator").is_some() {
                match schema.discriminate(value) {
                    Some(target) => {
                        validate_node(&target, value, exception, warning, options, seen)
                    }
                    None => exception.message("Unable to discriminate value"),
                }
                return;
            }
            let mut matched = 0usize;
            for branch in branches {
                let quiet = Exception::new("candidate");
                let quiet_warning = Exception::new("candidate");
                let mut branch_seen = SeenSet::default();
                validate_node(branch, value, &quiet, &quiet_warning, options, &mut branch_seen);
                if !quiet.has_exception() {
                    matched += 1;
                }
            }
            match composite {
                Composite::OneOf(_) if matched != 1 => exception.message(format!(
                    "Value must validate against exactly one schema, but validated against {}",
                    matched
                )),
                Composite::AnyOf(_) if matched == 0 => exception
                    .message("Value did not validate against any of the anyOf schemas"),
                _ => {}
            }
        }
        Composite::Not(branch) => {
            let quiet = Exception::new("candidate");
            let quiet_warning = Exception::new("candidate");
            let mut branch_seen = SeenSet::default();
            validate_node(branch, value, &quiet, &quiet_warning, options, &mut branch_seen);
            if !quiet.has_exception() {
                exception.message("Value must not validate against the not schema");
            }
        }
    }
}

/// The comparable magnitude of a value under this schema: numbers directly,
/// dates through their timestamp when the format is numeric.
pub(crate) fn numeric_magnitude(schema: &Schema, value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Date(date) => {
            let numeric = schema.primitive_kind().map_or(false, |kind| {
                schema
                    .graph
                    .data_types
                    .is_numeric(kind, schema.format().as_deref())
            });
            numeric.then(|| date.timestamp() as f64)
        }
        _ => None,
    }
}

fn render_bound(bound: &Value) -> String {
    bound.to_json().to_string()
}

fn validate_bounds(schema: &Schema, value: &Value, exception: &Exception) {
    let actual = match numeric_magnitude(schema, value) {
        Some(actual) => actual,
        None => return,
    };
    if let Some(maximum) = schema.prop("maximum") {
        if let Some(limit) = numeric_magnitude(schema, &maximum) {
            let exclusive = schema
                .prop("exclusiveMaximum")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if exclusive && actual >= limit {
                exception.message(format!(
                    "Value must be less than {}",
                    render_bound(&maximum)
                ));
            } else if !exclusive && actual > limit {
                exception.message(format!(
                    "Value must be less than or equal to {}",
                    render_bound(&maximum)
                ));
            }
        }
    }
    if let Some(minimum) = schema.prop("minimum") {
        if let Some(limit) = numeric_magnitude(schema, &minimum) {
            let exclusive = schema
                .prop("exclusiveMinimum")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if exclusive && actual <= limit {
                exception.message(format!(
                    "Value must be greater than {}",
                    render_bound(&minimum)
                ));
            } else if !exclusive && actual < limit {
                exception.message(format!(
                    "Value must be greater than or equal to {}",
                    render_bound(&minimum)
                ));
            }
        }
    }
    if let (Some(multiple_of), Value::Number(_)) = (
        schema.prop("multipleOf").and_then(|v| v.as_f64()),
        value,
    ) {
        if !is_multiple_of(actual, multiple_of) {
            exception.message(format!("Value must be a multiple of {}", multiple_of));
        }
    }
}

/// Exact multiple check. Floats near precision limits fall back to big
/// fraction arithmetic.
pub(crate) fn is_multiple_of(value: f64, multiple_of: f64) -> bool {
    if multiple_of == 0.0 {
        return false;
    }
    let remainder = (value / multiple_of) % 1.0;
    if remainder.is_nan() || remainder.abs() >= f64::EPSILON {
        let fraction = BigFraction::from(value) / BigFraction::from(multiple_of);
        match fraction.denom() {
            Some(denom) => denom == &BigUint::from(1_u8),
            None => true,
        }
    } else {
        true
    }
}

/// Range enforcement for the specification's integer formats.
fn validate_integer_format(schema: &Schema, value: &Value, exception: &Exception) {
    if schema.type_name().as_deref() != Some("integer") {
        return;
    }
    let number = match value.as_f64() {
        Some(number) => number,
        None => return,
    };
    match schema.format().as_deref() {
        Some("int32") => {
            if NumCmp::num_lt(number, i32::MIN) || NumCmp::num_gt(number, i32::MAX) {
                exception.message("Value is out of range for format int32");
            }
        }
        Some("int64") => {
            if NumCmp::num_lt(number, i64::MIN) || NumCmp::num_gt(number, i64::MAX) {
                exception.message("Value is out of range for format int64");
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::is_multiple_of;
    use test_case::test_case;

    #[test_case(4.0, 2.0, true)]
    #[test_case(10.0, 5.0, true)]
    #[test_case(3.0, 1.5, true)]
    #[test_case(1.1, 0.1, true)]
    #[test_case(4.55, 0.1, false)]
    #[test_case(1.01, 0.02, false)]
    #[test_case(4.5, 0.2, false)]
    #[test_case(1.0, 0.0, false)]
    fn multiples(value: f64, multiple_of: f64, expected: bool) {
        assert_eq!(is_multiple_of(value, multiple_of), expected);
    }
}
