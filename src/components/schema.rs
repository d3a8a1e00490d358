//! The meta validator driving normalization of Schema nodes.
//!
//! Property weights are load bearing: `type` resolves first, then `format`,
//! then the numeric bounds, so later callbacks can read the partially built
//! result through the walk context.
use crate::{
    components::ComponentSpec,
    context::{ComponentId, WalkCtx},
    data_types::{CodecContext, PrimitiveKind},
    schema::Schema,
    validator::{Computed, Descriptor, EnforcerRef, Validator},
    value::{DefinitionType, Value},
};
use std::{cmp::Ordering, convert::TryFrom, rc::Rc};

pub(crate) const NAME: &str = "Schema";

pub(crate) fn spec() -> ComponentSpec {
    ComponentSpec {
        name: NAME,
        validator,
        init: Some(init),
    }
}

fn validator() -> Rc<Descriptor> {
    Rc::new(Descriptor {
        kind: Some(Computed::Constant(vec![DefinitionType::Object])),
        properties: vec![
            (
                "type",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::String])),
                    enum_values: Some(Computed::Dynamic(type_options)),
                    required: Some(Computed::Dynamic(type_required)),
                    weight: -10,
                    ..Descriptor::default()
                }),
            ),
            (
                "format",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::String])),
                    allowed: Some(Computed::Dynamic(format_allowed)),
                    errors: Some(format_errors),
                    weight: -9,
                    ..Descriptor::default()
                }),
            ),
            (
                "maximum",
                Validator::from(Descriptor {
                    kind: Some(Computed::Dynamic(bound_kinds)),
                    allowed: Some(Computed::Dynamic(numeric_ish)),
                    deserialize: Some(deserialize_bound),
                    weight: -8,
                    ..Descriptor::default()
                }),
            ),
            (
                "minimum",
                Validator::from(Descriptor {
                    kind: Some(Computed::Dynamic(bound_kinds)),
                    allowed: Some(Computed::Dynamic(numeric_ish)),
                    deserialize: Some(deserialize_bound),
                    weight: -8,
                    ..Descriptor::default()
                }),
            ),
            (
                "multipleOf",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Number])),
                    allowed: Some(Computed::Dynamic(numeric_ish)),
                    weight: -8,
                    ..Descriptor::default()
                }),
            ),
            (
                "exclusiveMaximum",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    allowed: Some(Computed::Dynamic(numeric_ish)),
                    ..Descriptor::default()
                }),
            ),
            (
                "exclusiveMinimum",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    allowed: Some(Computed::Dynamic(numeric_ish)),
                    ..Descriptor::default()
                }),
            ),
            (
                "enum",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Array])),
                    items: Some(Box::new(Validator::from(Descriptor {
                        kind: Some(Computed::Dynamic(enum_item_kinds)),
                        free_form: Some(Computed::Constant(true)),
                        ..Descriptor::default()
                    }))),
                    weight: -7,
                    ..Descriptor::default()
                }),
            ),
            (
                "items",
                Validator::Ref(EnforcerRef::with_config(
                    NAME,
                    Descriptor {
                        allowed: Some(Computed::Dynamic(type_is_array)),
                        required: Some(Computed::Dynamic(type_is_array)),
                        weight: -6,
                        ..Descriptor::default()
                    },
                )),
            ),
            (
                "properties",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Object])),
                    allowed: Some(Computed::Dynamic(type_is_object)),
                    additional: Some(Box::new(Validator::Ref(EnforcerRef::new(NAME)))),
                    weight: -5,
                    ..Descriptor::default()
                }),
            ),
            (
                "additionalProperties",
                Validator::Ref(EnforcerRef::with_config(
                    NAME,
                    Descriptor {
                        kind: Some(Computed::Constant(vec![
                            DefinitionType::Boolean,
                            DefinitionType::Object,
                        ])),
                        allowed: Some(Computed::Dynamic(type_is_object)),
                        default: Some(Computed::Constant(Value::Bool(true))),
                        ..Descriptor::default()
                    },
                )),
            ),
            (
                "maxItems",
                Validator::from(count_constraint(type_is_array)),
            ),
            (
                "minItems",
                Validator::from(count_constraint(type_is_array)),
            ),
            (
                "uniqueItems",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    allowed: Some(Computed::Dynamic(type_is_array)),
                    ..Descriptor::default()
                }),
            ),
            (
                "maxLength",
                Validator::from(count_constraint(type_is_string_like)),
            ),
            (
                "minLength",
                Validator::from(count_constraint(type_is_string_like)),
            ),
            (
                "pattern",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::String])),
                    allowed: Some(Computed::Dynamic(type_is_string)),
                    deserialize: Some(deserialize_pattern),
                    ..Descriptor::default()
                }),
            ),
            (
                "maxProperties",
                Validator::from(count_constraint(type_is_object)),
            ),
            (
                "minProperties",
                Validator::from(count_constraint(type_is_object)),
            ),
            (
                "required",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Array])),
                    allowed: Some(Computed::Dynamic(type_is_object)),
                    items: Some(Box::new(Validator::from(Descriptor::typed(&[
                        DefinitionType::String,
                    ])))),
                    errors: Some(required_errors),
                    weight: 1,
                    ..Descriptor::default()
                }),
            ),
            (
                "nullable",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    allowed: Some(Computed::Dynamic(is_v3)),
                    ..Descriptor::default()
                }),
            ),
            ("discriminator", Validator::Dynamic(discriminator_validator)),
            (
                "readOnly",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    ..Descriptor::default()
                }),
            ),
            (
                "writeOnly",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    allowed: Some(Computed::Dynamic(is_v3)),
                    ..Descriptor::default()
                }),
            ),
            (
                "deprecated",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    allowed: Some(Computed::Dynamic(is_v3)),
                    ..Descriptor::default()
                }),
            ),
            (
                "allOf",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Array])),
                    items: Some(Box::new(Validator::Ref(EnforcerRef::new(NAME)))),
                    ..Descriptor::default()
                }),
            ),
            (
                "anyOf",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Array])),
                    allowed: Some(Computed::Dynamic(is_v3)),
                    items: Some(Box::new(Validator::Ref(EnforcerRef::new(NAME)))),
                    ..Descriptor::default()
                }),
            ),
            (
                "oneOf",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Array])),
                    allowed: Some(Computed::Dynamic(is_v3)),
                    items: Some(Box::new(Validator::Ref(EnforcerRef::new(NAME)))),
                    ..Descriptor::default()
                }),
            ),
            (
                "not",
                Validator::Ref(EnforcerRef::with_config(
                    NAME,
                    Descriptor {
                        allowed: Some(Computed::Dynamic(is_v3)),
                        ..Descriptor::default()
                    },
                )),
            ),
            ("title", Validator::from(Descriptor::typed(&[DefinitionType::String]))),
            (
                "description",
                Validator::from(Descriptor::typed(&[DefinitionType::String])),
            ),
            ("default", Validator::Any(true)),
            ("example", Validator::Any(true)),
        ],
        errors: Some(schema_errors),
        ..Descriptor::default()
    })
}

fn count_constraint(allowed: fn(&WalkCtx) -> bool) -> Descriptor {
    Descriptor {
        kind: Some(Computed::Constant(vec![DefinitionType::Number])),
        allowed: Some(Computed::Dynamic(allowed)),
        deserialize: Some(deserialize_non_negative_integer),
        ..Descriptor::default()
    }
}

// -- context helpers ---------------------------------------------------------

/// Read a property of the partially built schema the callback's property
/// belongs to.
fn schema_prop(ctx: &WalkCtx, key: &str) -> Option<Value> {
    ctx.parent_result().and_then(|result| result.get(key))
}

fn schema_type(ctx: &WalkCtx) -> Option<String> {
    schema_prop(ctx, "type").and_then(|value| value.as_str())
}

fn schema_format(ctx: &WalkCtx) -> Option<String> {
    schema_prop(ctx, "format").and_then(|value| value.as_str())
}

fn schema_kind(ctx: &WalkCtx) -> Option<PrimitiveKind> {
    schema_type(ctx).and_then(|name| PrimitiveKind::try_from(name.as_str()).ok())
}

fn is_v3(ctx: &WalkCtx) -> bool {
    ctx.version().major == 3
}

fn type_is_array(ctx: &WalkCtx) -> bool {
    schema_type(ctx).as_deref() == Some("array")
}

fn type_is_object(ctx: &WalkCtx) -> bool {
    schema_type(ctx).as_deref() == Some("object")
}

fn type_is_string(ctx: &WalkCtx) -> bool {
    schema_type(ctx).as_deref() == Some("string")
}

fn type_is_string_like(ctx: &WalkCtx) -> bool {
    matches!(schema_type(ctx).as_deref(), Some("string") | Some("file"))
}

/// Numeric natively or through a format flagged `isNumeric`.
fn numeric_ish(ctx: &WalkCtx) -> bool {
    match schema_kind(ctx) {
        Some(kind) => ctx
            .data_types()
            .is_numeric(kind, schema_format(ctx).as_deref()),
        None => false,
    }
}

/// `file` is v2 only and only valid where no schema sits above.
fn nested_in_schema(ctx: &WalkCtx) -> bool {
    let schema_ctx = match &ctx.parent {
        Some(parent) => Rc::clone(parent),
        None => return false,
    };
    let own = schema_ctx
        .definition
        .as_ref()
        .and_then(Value::address);
    let mut current = schema_ctx.parent.clone();
    while let Some(ancestor) = current {
        if let Some(definition) = &ancestor.definition {
            if definition.address() != own {
                if let Some(id) = ancestor.state.graph.instance_for(definition) {
                    if ancestor.state.graph.kind(id) == NAME {
                        return true;
                    }
                }
            }
        }
        current = ancestor.parent.clone();
    }
    false
}

// -- property callbacks ------------------------------------------------------

fn type_options(ctx: &WalkCtx) -> Vec<Value> {
    let mut options = vec!["array", "boolean", "integer", "number", "string"];
    if ctx.version().major == 2 && !nested_in_schema(ctx) {
        options.push("file");
    }
    options.into_iter().map(Value::from).collect()
}

/// `type` is required unless a composite carries the shape.
fn type_required(ctx: &WalkCtx) -> bool {
    let definition = match ctx.parent.as_ref().and_then(|parent| parent.definition.clone()) {
        Some(definition) => definition,
        None => return false,
    };
    !["allOf", "anyOf", "oneOf", "not"]
        .iter()
        .any(|composite| definition.get(composite).is_some())
}

fn format_allowed(ctx: &WalkCtx) -> bool {
    matches!(
        schema_type(ctx).as_deref(),
        Some("boolean") | Some("integer") | Some("number") | Some("string")
    )
}

/// Unknown formats warn rather than error.
fn format_errors(ctx: &WalkCtx) {
    let format = match ctx.result.borrow().clone().and_then(|value| value.as_str()) {
        Some(format) => format,
        None => return,
    };
    if let Some(kind) = schema_kind(ctx) {
        if !ctx.data_types().is_standard(kind, &format) {
            ctx.warning
                .message(format!("Non standard format used: {}", format));
        }
    }
}

/// Bounds on string typed numerics (e.g. dates) arrive as strings.
fn bound_kinds(ctx: &WalkCtx) -> Vec<DefinitionType> {
    if schema_type(ctx).as_deref() == Some("string") {
        vec![DefinitionType::String]
    } else {
        vec![DefinitionType::Number]
    }
}

/// Convert a bound through the format codec so that cross field checks and
/// value validation compare native forms. Bound checks against the schema
/// itself are skipped here to avoid recursion.
fn deserialize_bound(ctx: &WalkCtx, value: Value) -> Result<Value, String> {
    if let (Some(kind), Some(format)) = (schema_kind(ctx), schema_format(ctx)) {
        if let Some(codec) = ctx.data_types().get(kind, &format) {
            let schema = ctx
                .parent_result()
                .and_then(|result| result.as_object())
                .map(|map| map.borrow().clone())
                .unwrap_or_default();
            return (codec.deserialize)(&CodecContext { schema: &schema }, &value);
        }
    }
    if schema_type(ctx).as_deref() == Some("integer") {
        let integral = value
            .as_f64()
            .map_or(false, |number| number.fract() == 0.0);
        if !integral {
            return Err("Value must be an integer".to_string());
        }
    }
    Ok(value)
}

fn deserialize_non_negative_integer(_: &WalkCtx, value: Value) -> Result<Value, String> {
    match &value {
        Value::Number(number) if number.as_u64().is_some() => Ok(value),
        _ => Err("Value must be a non-negative integer".to_string()),
    }
}

/// Empty patterns report an error and fall back to a universal matcher; the
/// dual signal is deliberate.
fn deserialize_pattern(ctx: &WalkCtx, value: Value) -> Result<Value, String> {
    match &value {
        Value::String(text) => {
            if text.is_empty() {
                ctx.exception.message("Value must be a non-empty string");
                return Ok(Value::Regex(Rc::new(
                    fancy_regex::Regex::new("").expect("the empty pattern compiles"),
                )));
            }
            fancy_regex::Regex::new(text)
                .map(|regex| Value::Regex(Rc::new(regex)))
                .map_err(|_| "Value must be a valid regular expression".to_string())
        }
        _ => Ok(value),
    }
}

/// Enum members carry the parent's type, plus `null` when nullable.
fn enum_item_kinds(ctx: &WalkCtx) -> Vec<DefinitionType> {
    let enum_ctx = ctx.parent.as_ref();
    let type_name = enum_ctx
        .and_then(|parent| parent.parent_result())
        .and_then(|result| result.get("type"))
        .and_then(|value| value.as_str());
    let mut kinds = match type_name.as_deref() {
        Some("array") => vec![DefinitionType::Array],
        Some("boolean") => vec![DefinitionType::Boolean],
        Some("integer") | Some("number") => vec![DefinitionType::Number],
        Some("object") => vec![DefinitionType::Object],
        Some("string") | Some("file") => vec![DefinitionType::String],
        _ => vec![
            DefinitionType::Array,
            DefinitionType::Boolean,
            DefinitionType::Number,
            DefinitionType::Object,
            DefinitionType::String,
        ],
    };
    let nullable = enum_ctx
        .and_then(|parent| parent.parent.as_ref().and_then(|schema| schema.definition.clone()))
        .and_then(|definition| definition.get("nullable"))
        .and_then(|value| value.as_bool())
        .unwrap_or(false);
    if nullable {
        kinds.push(DefinitionType::Null);
    }
    kinds
}

/// Every required name must land in `properties`, unless additional
/// properties may absorb it.
fn required_errors(ctx: &WalkCtx) {
    let names = match ctx.result.borrow().clone().and_then(|value| value.as_array()) {
        Some(names) => names.borrow().clone(),
        None => return,
    };
    let properties = schema_prop(ctx, "properties");
    let additional_allowed = !matches!(schema_prop(ctx, "additionalProperties"), Some(Value::Bool(false)));
    for (index, name) in names.iter().enumerate() {
        let name = match name.as_str() {
            Some(name) => name,
            None => continue,
        };
        let defined = properties
            .as_ref()
            .map_or(false, |properties| properties.get(&name).is_some());
        if !defined && !additional_allowed {
            ctx.exception.at(index).message(format!(
                "Required property is not defined in properties: {}",
                name
            ));
        }
        if ctx.version().major == 2 && defined {
            let read_only = properties
                .as_ref()
                .and_then(|properties| properties.get(&name))
                .and_then(|schema| match schema {
                    Value::Component(id) => ctx.state.graph.prop(id, "readOnly"),
                    _ => None,
                })
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            if read_only {
                ctx.warning.at(index).message(format!(
                    "Property should not be marked as both read only and required: {}",
                    name
                ));
            }
        }
    }
}

/// v2 uses a bare property name, v3 a Discriminator component.
fn discriminator_validator(ctx: &WalkCtx) -> Validator {
    if ctx.version().major == 2 {
        Validator::from(Descriptor::typed(&[DefinitionType::String]))
    } else {
        Validator::Ref(EnforcerRef::new(super::discriminator::NAME))
    }
}

// -- cross field checks ------------------------------------------------------

fn bound_ordering(minimum: &Value, maximum: &Value) -> Option<Ordering> {
    match (minimum, maximum) {
        (Value::Number(minimum), Value::Number(maximum)) => {
            minimum.as_f64().partial_cmp(&maximum.as_f64())
        }
        (Value::Date(minimum), Value::Date(maximum)) => Some(minimum.cmp(maximum)),
        _ => None,
    }
}

fn schema_errors(ctx: &WalkCtx) {
    let result = match ctx.result.borrow().clone() {
        Some(result) => result,
        None => return,
    };

    if let Some(definition) = &ctx.definition {
        let composites: Vec<&str> = ["allOf", "anyOf", "oneOf", "not"]
            .into_iter()
            .filter(|composite| definition.get(composite).is_some())
            .collect();
        if composites.len() > 1 {
            ctx.exception.message(format!(
                "Cannot have multiple composites: {}",
                composites.join(", ")
            ));
        }
    }

    if let (Some(minimum), Some(maximum)) = (result.get("minimum"), result.get("maximum")) {
        let exclusive = result
            .get("exclusiveMinimum")
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
            || result
                .get("exclusiveMaximum")
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
        match bound_ordering(&minimum, &maximum) {
            Some(Ordering::Greater) => ctx
                .exception
                .message("Property minimum must be less than or equal to property maximum"),
            Some(Ordering::Equal) if exclusive => ctx
                .exception
                .message("Property minimum must be less than property maximum"),
            _ => {}
        }
    }
    for (low, high) in [
        ("minItems", "maxItems"),
        ("minLength", "maxLength"),
        ("minProperties", "maxProperties"),
    ] {
        if let (Some(minimum), Some(maximum)) = (
            result.get(low).and_then(|value| value.as_u64()),
            result.get(high).and_then(|value| value.as_u64()),
        ) {
            if minimum > maximum {
                ctx.exception.message(format!(
                    "Property {} must be less than or equal to property {}",
                    low, high
                ));
            }
        }
    }

    let read_only = result.get("readOnly").and_then(|v| v.as_bool()).unwrap_or(false);
    let write_only = result.get("writeOnly").and_then(|v| v.as_bool()).unwrap_or(false);
    if read_only && write_only {
        ctx.exception
            .message("Schema cannot be marked as both readOnly and writeOnly");
    }

    if let (Some(required), Some(max_properties)) = (
        result.get("required").and_then(|value| value.as_array()),
        result.get("maxProperties").and_then(|value| value.as_u64()),
    ) {
        if required.borrow().len() as u64 > max_properties {
            ctx.exception
                .message("The number of required properties exceeds maxProperties");
        }
    }

    match result.get("discriminator") {
        Some(Value::String(name)) => {
            let listed = result
                .get("required")
                .and_then(|value| value.as_array())
                .map_or(false, |required| {
                    required
                        .borrow()
                        .iter()
                        .any(|item| item.as_str().as_deref() == Some(name.as_str()))
                });
            if !listed {
                ctx.exception
                    .at("discriminator")
                    .message("Value must be found in the parent's required properties");
            }
        }
        Some(Value::Component(id)) => {
            let property_name = ctx
                .state
                .graph
                .prop(id, "propertyName")
                .and_then(|value| value.as_str());
            if let Some(property_name) = property_name {
                let required = result
                    .get("required")
                    .and_then(|value| value.as_array())
                    .map_or(false, |required| {
                        required
                            .borrow()
                            .iter()
                            .any(|item| item.as_str().as_deref() == Some(property_name.as_str()))
                    });
                if !required {
                    ctx.exception
                        .at("discriminator")
                        .at("propertyName")
                        .message("Value must be found in the parent's required properties");
                }
                let defined = result
                    .get("properties")
                    .map_or(false, |properties| properties.get(&property_name).is_some());
                if !defined {
                    ctx.exception
                        .at("discriminator")
                        .at("propertyName")
                        .message("Value must exist in the parent's properties");
                }
            }
        }
        _ => {}
    }
}

// -- deferred work -----------------------------------------------------------

/// Deserialize, validate and freeze `default`, `example` and `enum` once the
/// whole tree is materialized.
fn init(ctx: &Rc<WalkCtx>, id: ComponentId) {
    let graph = Rc::clone(&ctx.state.graph);
    let exception = ctx.exception.clone();
    let warning = ctx.warning.clone();
    ctx.enqueue_plugin(move || {
        let schema = Schema::new(Rc::clone(&graph), id);
        // Enum members freeze first: defaults and examples validate against
        // the deserialized members, not the raw ones.
        if let Some(options) = graph.prop(id, "enum").and_then(|value| value.as_array()) {
            let snapshot: Vec<Value> = options.borrow().clone();
            let mut frozen = Vec::with_capacity(snapshot.len());
            for (index, option) in snapshot.into_iter().enumerate() {
                let outcome = schema.deserialize(&option);
                match outcome.value {
                    Some(value) => {
                        frozen.push(value.deep_copy());
                    }
                    None => {
                        if let Some(error) = outcome.error {
                            exception.at("enum").at(index).push(&error);
                        }
                        frozen.push(option);
                    }
                }
            }
            graph.set_prop(id, "enum", Value::array(frozen.clone()));
            for (index, member) in frozen.iter().enumerate() {
                if let Some(error) = schema.validate(member).error {
                    exception.at("enum").at(index).push(&error);
                }
            }
        }
        // Bound values themselves must satisfy the schema, bounds excepted.
        for key in ["maximum", "minimum"] {
            if let Some(bound) = graph.prop(id, key) {
                let relaxed = crate::schema::validate::ValidateOptions { max_min: false };
                if let Some(error) = schema.validate_with(&bound, relaxed).error {
                    exception.at(key).push(&error);
                }
            }
        }
        for key in ["default", "example"] {
            let raw = match graph.prop(id, key) {
                Some(raw) => raw,
                None => continue,
            };
            let outcome = schema.deserialize(&raw);
            match outcome.value {
                Some(value) => {
                    let validated = schema.validate(&value);
                    if let Some(error) = validated.error {
                        warning.at(key).push(&error);
                    }
                    graph.set_prop(id, key, value.deep_copy());
                }
                None => {
                    if let Some(error) = outcome.error {
                        warning.at(key).push(&error);
                    }
                }
            }
        }
    });
}
