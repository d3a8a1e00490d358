//! The recursive, validator driven walker.
//!
//! `normalize` applies the validator in force to the definition under
//! examination and produces the materialized result: scalars pass through,
//! arrays and objects recurse, and [`EnforcerRef`] markers instantiate
//! component instances in the arena. Violations land in the scoped exception
//! collectors; the walker itself never fails.
use crate::{
    context::WalkCtx,
    validator::{Computed, Descriptor, EnforcerRef, Validator},
    value::{deep_equal, DefinitionType, Map, Value},
};
use lazy_static::lazy_static;
use regex::Regex;
use std::{panic::AssertUnwindSafe, rc::Rc};

lazy_static! {
    static ref EXTENSION_KEY: Regex = Regex::new("^x-.+").expect("Is a valid regex");
}

/// Whether a key is a specification extension (copied verbatim).
pub(crate) fn is_extension_key(key: &str) -> bool {
    EXTENSION_KEY.is_match(key)
}

/// Run a callback, converting a panic into "Unexpected error encountered" at
/// the current path. Debug mode lets the panic propagate.
pub(crate) fn guarded<T>(ctx: &WalkCtx, callback: impl FnOnce() -> T) -> Option<T> {
    if ctx.state.debug {
        return Some(callback());
    }
    match std::panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(value) => Some(value),
        Err(_) => {
            ctx.exception.message("Unexpected error encountered");
            None
        }
    }
}

fn resolve_bool(ctx: &WalkCtx, computed: &Option<Computed<bool>>, fallback: bool) -> bool {
    match computed {
        None => fallback,
        Some(computed) => guarded(ctx, || computed.resolve(ctx)).unwrap_or(fallback),
    }
}

/// Replace a `Dynamic` validator with its resolution, repeatedly. Returns
/// `false` when a resolution callback panicked.
fn settle_validator(ctx: &Rc<WalkCtx>) -> bool {
    loop {
        let current = ctx.validator.borrow().clone();
        match current {
            Validator::Dynamic(callback) => match guarded(ctx, || callback(ctx)) {
                Some(resolved) => *ctx.validator.borrow_mut() = resolved,
                None => return false,
            },
            _ => return true,
        }
    }
}

/// Normalize the definition held by `ctx` under its validator.
pub(crate) fn normalize(ctx: &Rc<WalkCtx>) -> Option<Value> {
    if !settle_validator(ctx) {
        return None;
    }
    let validator = ctx.validator.borrow().clone();
    match validator {
        Validator::Ref(reference) => run_enforcer_ref(ctx, &reference),
        Validator::Any(true) => ctx.definition.as_ref().map(Value::deep_copy),
        Validator::Any(false) => {
            match &ctx.definition {
                None => {}
                Some(Value::Object(map)) => {
                    for key in map.borrow().keys() {
                        ctx.exception.at(key.as_str()).message("Property not allowed");
                    }
                }
                Some(_) => ctx.exception.message("Value not allowed"),
            }
            None
        }
        Validator::Descriptor(descriptor) => normalize_with_descriptor(ctx, &descriptor),
        Validator::Dynamic(_) => unreachable!("settled above"),
    }
}

/// Type check, cycle guard, enum check, dispatch, post errors.
pub(crate) fn normalize_with_descriptor(
    ctx: &Rc<WalkCtx>,
    descriptor: &Rc<Descriptor>,
) -> Option<Value> {
    let definition_type = ctx.definition_type();

    // Type check. Only performed when the definition is present.
    if ctx.definition.is_some() {
        if let Some(kind) = &descriptor.kind {
            let allowed = guarded(ctx, || kind.resolve(ctx))?;
            let matches = definition_type.map_or(false, |actual| allowed.contains(&actual));
            if !matches {
                let expected = allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" or ");
                ctx.exception
                    .message(format!("Value must be of type {}", expected));
                return None;
            }
        }
    }

    // Cycle guard: a shared definition normalized under the same validator
    // resolves to the first seen materialized result.
    let cycle_key = ctx
        .definition
        .as_ref()
        .and_then(Value::address)
        .map(|address| (address, Rc::as_ptr(descriptor) as usize));
    if let Some(key) = cycle_key {
        if let Some(cached) = ctx.state.seen.borrow().get(&key) {
            return Some(cached.clone());
        }
    }

    // Enum check.
    if let (Some(enum_values), Some(definition)) = (&descriptor.enum_values, &ctx.definition) {
        let allowed = guarded(ctx, || enum_values.resolve(ctx))?;
        if !allowed.iter().any(|option| deep_equal(option, definition)) {
            let rendered = allowed
                .iter()
                .map(|option| format!("{:?}", option))
                .collect::<Vec<_>>()
                .join(", ");
            ctx.exception
                .message(format!("Value must be one of: {}", rendered));
        }
    }

    let result = match definition_type {
        Some(DefinitionType::Undefined) => None,
        Some(DefinitionType::Array) => normalize_array(ctx, descriptor, cycle_key),
        Some(DefinitionType::Object) => normalize_object(ctx, descriptor, cycle_key),
        Some(_) => {
            let result = ctx.definition.clone();
            *ctx.result.borrow_mut() = result.clone();
            result
        }
        None => {
            ctx.exception.message("Unknown data type");
            None
        }
    };

    // Post deserialization, e.g. compiling `pattern` into a regex.
    let result = match (descriptor.deserialize, result) {
        (Some(callback), Some(value)) => {
            match guarded(ctx, || callback(ctx, value.clone())) {
                Some(Ok(converted)) => {
                    *ctx.result.borrow_mut() = Some(converted.clone());
                    Some(converted)
                }
                Some(Err(message)) => {
                    ctx.exception.message(message);
                    Some(value)
                }
                None => Some(value),
            }
        }
        (_, result) => result,
    };

    // Cross field checks against the materialized result.
    if let Some(errors) = descriptor.errors {
        if ctx.result.borrow().is_some() {
            guarded(ctx, || errors(ctx));
        }
    }

    result
}

fn normalize_array(
    ctx: &Rc<WalkCtx>,
    descriptor: &Rc<Descriptor>,
    cycle_key: Option<(usize, usize)>,
) -> Option<Value> {
    let result = Value::array(Vec::new());
    if let Some(key) = cycle_key {
        ctx.state.seen.borrow_mut().insert(key, result.clone());
    }
    *ctx.result.borrow_mut() = Some(result.clone());
    let target = result.as_array().expect("created as an array");
    // Snapshot the elements: the definition may alias the result's source.
    let elements: Vec<Value> = ctx
        .definition
        .as_ref()
        .and_then(Value::as_array)
        .map(|items| items.borrow().clone())
        .unwrap_or_default();
    for (index, element) in elements.into_iter().enumerate() {
        match &descriptor.items {
            Some(item_validator) => {
                let child = ctx.child(index, Some(element), (**item_validator).clone());
                if let Some(value) = normalize(&child) {
                    target.borrow_mut().push(value);
                }
            }
            None => target.borrow_mut().push(element),
        }
    }
    Some(result)
}

fn normalize_object(
    ctx: &Rc<WalkCtx>,
    descriptor: &Rc<Descriptor>,
    cycle_key: Option<(usize, usize)>,
) -> Option<Value> {
    if resolve_bool(ctx, &descriptor.free_form, false) {
        return ctx.definition.as_ref().map(Value::deep_copy);
    }

    let result = Value::object(Map::new());
    if let Some(key) = cycle_key {
        ctx.state.seen.borrow_mut().insert(key, result.clone());
    }
    *ctx.result.borrow_mut() = Some(result.clone());
    let target = result.as_object().expect("created as an object");
    let snapshot: Map = ctx
        .definition
        .as_ref()
        .and_then(Value::as_object)
        .map(|map| map.borrow().clone())
        .unwrap_or_default();

    // Extension keys are copied verbatim in every mode.
    for (key, value) in &snapshot {
        if is_extension_key(key) {
            target.borrow_mut().insert(key.clone(), value.deep_copy());
        }
    }

    if let Some(additional) = &descriptor.additional {
        // Map like object: every non extension key runs the same validator.
        for (key, value) in &snapshot {
            if is_extension_key(key) {
                continue;
            }
            let child = ctx.child(key.as_str(), Some(value.clone()), (**additional).clone());
            if !settle_validator(&child) {
                continue;
            }
            let capabilities = child.validator.borrow().capabilities();
            if let Some(capabilities) = &capabilities {
                if resolve_bool(&child, &capabilities.ignored, false) {
                    continue;
                }
            }
            if let Some(value) = normalize(&child) {
                target.borrow_mut().insert(key.clone(), value);
            }
        }
        return Some(result);
    }

    // Structured object: the canonical path.
    let mut unknown_keys: Vec<&String> = snapshot
        .keys()
        .filter(|key| !is_extension_key(key))
        .collect();

    let mut ordered: Vec<(&'static str, Validator, i32)> = descriptor
        .properties
        .iter()
        .map(|(key, validator)| {
            unknown_keys.retain(|unknown| unknown.as_str() != *key);
            let weight = validator.capabilities().map_or(0, |caps| caps.weight);
            (*key, validator.clone(), weight)
        })
        .collect();
    // Low weights first; ties resolve by key. The order is load bearing:
    // early properties deposit results later callbacks read.
    ordered.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(b.0)));

    let mut not_allowed: Vec<String> = unknown_keys.into_iter().cloned().collect();
    let mut missing_required: Vec<&'static str> = Vec::new();

    for (key, validator, _) in ordered {
        let raw = snapshot.get(key).cloned();
        let present_in_definition = raw.is_some();
        let mut child = ctx.child(key, raw, validator);
        if !settle_validator(&child) {
            continue;
        }
        let capabilities = child.validator.borrow().capabilities();
        let allowed = capabilities
            .as_ref()
            .map_or(true, |caps| resolve_bool(&child, &caps.allowed, true));

        if present_in_definition && !allowed {
            not_allowed.push(key.to_string());
            continue;
        }

        let mut present = present_in_definition;
        if !present && allowed {
            if let Some(default) = capabilities.as_ref().and_then(|caps| caps.default.clone()) {
                if let Some(value) = guarded(&child, || default.resolve(&child)) {
                    child = child.with_definition(value);
                    present = true;
                }
            }
        }

        if present {
            if capabilities
                .as_ref()
                .map_or(false, |caps| resolve_bool(&child, &caps.ignored, false))
            {
                continue;
            }
            if let Some(value) = normalize(&child) {
                target.borrow_mut().insert(key.to_string(), value);
            }
        } else if allowed
            && capabilities
                .as_ref()
                .map_or(false, |caps| resolve_bool(&child, &caps.required, false))
        {
            missing_required.push(key);
        }
    }

    not_allowed.sort();
    for key in &not_allowed {
        ctx.exception.at(key.as_str()).message("Property not allowed");
    }
    missing_required.sort_unstable();
    match missing_required.len() {
        0 => {}
        1 => ctx
            .exception
            .message(format!("Missing required property: {}", missing_required[0])),
        _ => ctx.exception.message(format!(
            "Missing required properties: {}",
            missing_required.join(", ")
        )),
    }

    Some(result)
}

/// Dispatch between plain descriptors and component instantiation.
fn run_enforcer_ref(ctx: &Rc<WalkCtx>, reference: &EnforcerRef) -> Option<Value> {
    match ctx.definition_type() {
        Some(DefinitionType::Undefined) => None,
        Some(DefinitionType::Boolean) => match &reference.config {
            // e.g. `additionalProperties: true` continues under the inline
            // descriptor instead of instantiating a component.
            Some(config) => normalize_with_descriptor(ctx, config),
            None => {
                let result = ctx.definition.clone();
                *ctx.result.borrow_mut() = result.clone();
                result
            }
        },
        Some(DefinitionType::Object) => instantiate_component(ctx, reference),
        _ => {
            ctx.exception.message("Value must be a plain object");
            None
        }
    }
}

fn instantiate_component(ctx: &Rc<WalkCtx>, reference: &EnforcerRef) -> Option<Value> {
    let spec = match ctx.state.components.get(reference.component) {
        Some(spec) => Rc::clone(spec),
        None => {
            ctx.exception.message(format!(
                "Component not defined: {}",
                reference.component
            ));
            return None;
        }
    };
    let definition = ctx.definition.clone()?;
    let cycle_key = definition
        .address()
        .map(|address| (address, Rc::as_ptr(&spec) as usize));
    if let Some(key) = cycle_key {
        if let Some(cached) = ctx.state.seen.borrow().get(&key) {
            return Some(cached.clone());
        }
    }

    let graph = Rc::clone(&ctx.state.graph);
    let id = graph.allocate(spec.name, Some(definition.clone()), ctx.exception.pointer());
    // Register before descending so that cycles resolve to this instance.
    if let Some(key) = cycle_key {
        ctx.state
            .seen
            .borrow_mut()
            .insert(key, Value::Component(id));
    }
    graph.register_instance(&definition, id);
    tracing::trace!(component = spec.name, pointer = %ctx.exception.pointer(), "instantiating component");

    let descriptor = (spec.validator)();
    let inner = ctx.with_validator(Validator::Descriptor(Rc::clone(&descriptor)));
    match normalize_with_descriptor(&inner, &descriptor) {
        Some(Value::Object(map)) => {
            graph.set_props(id, map.borrow().clone());
        }
        _ => {
            // Normalization aborted; withdraw the half built instance.
            if let Some(key) = cycle_key {
                ctx.state.seen.borrow_mut().remove(&key);
            }
            return None;
        }
    }
    if let Some(init) = spec.init {
        guarded(ctx, || init(&inner, id));
    }
    Some(Value::Component(id))
}

#[cfg(test)]
mod tests {
    use super::normalize;
    use crate::{
        context::{Graph, SpecVersion, WalkCtx, WalkState},
        data_types::DataTypeRegistry,
        exception::Exception,
        validator::{Computed, Descriptor, Validator},
        value::{DefinitionType, Value},
    };
    use serde_json::json;
    use std::{collections::BTreeMap, rc::Rc};

    fn walk(definition: serde_json::Value, validator: Validator) -> (Option<Value>, Exception) {
        let graph = Rc::new(Graph::new(
            SpecVersion::v3(),
            Rc::new(DataTypeRegistry::with_builtins()),
            None,
        ));
        let state = Rc::new(WalkState::new(graph, Rc::new(BTreeMap::new()), false));
        let exception = Exception::new("errors");
        let warning = Exception::new("warnings");
        let ctx = WalkCtx::root(
            Some(Value::from(definition)),
            validator,
            state.clone(),
            exception.clone(),
            warning,
        );
        let result = normalize(&ctx);
        state.drain_plugins();
        (result, exception)
    }

    #[test]
    fn scalar_passthrough() {
        let validator = Validator::from(Descriptor::typed(&[DefinitionType::String]));
        let (result, exception) = walk(json!("hello"), validator);
        assert_eq!(result, Some(Value::from("hello")));
        assert!(!exception.has_exception());
    }

    #[test]
    fn type_mismatch_aborts_node() {
        let validator = Validator::from(Descriptor::typed(&[DefinitionType::String]));
        let (result, exception) = walk(json!(12), validator);
        assert!(result.is_none());
        assert_eq!(
            exception.entries()[0].1,
            "Value must be of type string"
        );
    }

    #[test]
    fn enum_violation_reports_options() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::String])),
            enum_values: Some(Computed::Constant(vec![
                Value::from("get"),
                Value::from("put"),
            ])),
            ..Descriptor::default()
        });
        let (_, exception) = walk(json!("fetch"), validator);
        assert_eq!(
            exception.entries()[0].1,
            "Value must be one of: \"get\", \"put\""
        );
    }

    #[test]
    fn free_form_objects_are_copied() {
        let (result, exception) = walk(json!({"a": {"b": 1}}), Validator::Any(true));
        assert!(!exception.has_exception());
        let result = result.unwrap();
        assert_eq!(result.get("a").unwrap().get("b"), Some(Value::from(1i64)));
    }

    #[test]
    fn false_validator_rejects_every_key() {
        let (result, exception) = walk(json!({"a": 1, "b": 2}), Validator::Any(false));
        assert!(result.is_none());
        let entries = exception.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "/a");
        assert_eq!(entries[1].0, "/b");
    }

    #[test]
    fn unknown_keys_are_not_allowed() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![(
                "name",
                Validator::from(Descriptor::typed(&[DefinitionType::String])),
            )],
            ..Descriptor::default()
        });
        let (_, exception) = walk(json!({"name": "ok", "bogus": 1}), validator);
        let entries = exception.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "/bogus");
        assert_eq!(entries[0].1, "Property not allowed");
    }

    #[test]
    fn extension_keys_are_copied_verbatim() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![],
            ..Descriptor::default()
        });
        let (result, exception) = walk(json!({"x-internal": {"keep": true}}), validator);
        assert!(!exception.has_exception());
        assert_eq!(
            result.unwrap().get("x-internal").unwrap().get("keep"),
            Some(Value::from(true))
        );
    }

    #[test]
    fn missing_required_property_message() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![(
                "title",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::String])),
                    required: Some(Computed::Constant(true)),
                    ..Descriptor::default()
                }),
            )],
            ..Descriptor::default()
        });
        let (_, exception) = walk(json!({}), validator);
        assert_eq!(
            exception.entries()[0].1,
            "Missing required property: title"
        );
    }

    #[test]
    fn defaults_are_synthesized() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![(
                "flag",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Boolean])),
                    default: Some(Computed::Constant(Value::Bool(true))),
                    ..Descriptor::default()
                }),
            )],
            ..Descriptor::default()
        });
        let (result, exception) = walk(json!({}), validator);
        assert!(!exception.has_exception());
        assert_eq!(result.unwrap().get("flag"), Some(Value::from(true)));
    }

    #[test]
    fn weight_orders_property_evaluation() {
        // The callback on the heavier property reads the lighter property's
        // deposit through the parent's partial result.
        fn requires_type(ctx: &WalkCtx) -> bool {
            ctx.parent_result()
                .and_then(|result| result.get("type"))
                .is_some()
        }
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![
                (
                    "maximum",
                    Validator::from(Descriptor {
                        kind: Some(Computed::Constant(vec![DefinitionType::Number])),
                        allowed: Some(Computed::Dynamic(requires_type)),
                        weight: -8,
                        ..Descriptor::default()
                    }),
                ),
                (
                    "type",
                    Validator::from(Descriptor {
                        kind: Some(Computed::Constant(vec![DefinitionType::String])),
                        weight: -10,
                        ..Descriptor::default()
                    }),
                ),
            ],
            ..Descriptor::default()
        });
        let (result, exception) = walk(json!({"maximum": 5, "type": "integer"}), validator);
        assert!(!exception.has_exception(), "{}", exception);
        let result = result.unwrap();
        assert_eq!(result.get("maximum"), Some(Value::from(5i64)));
    }

    #[test]
    fn ignored_properties_are_skipped_silently() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![(
                "legacy",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::String])),
                    ignored: Some(Computed::Constant(true)),
                    ..Descriptor::default()
                }),
            )],
            ..Descriptor::default()
        });
        let (result, exception) = walk(json!({"legacy": "anything"}), validator);
        assert!(!exception.has_exception());
        assert!(result.unwrap().get("legacy").is_none());
    }

    #[test]
    fn additional_properties_mode() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            additional: Some(Box::new(Validator::from(Descriptor::typed(&[
                DefinitionType::Number,
            ])))),
            ..Descriptor::default()
        });
        let (result, exception) = walk(json!({"a": 1, "b": "two"}), validator);
        let entries = exception.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "/b");
        assert_eq!(result.unwrap().get("a"), Some(Value::from(1i64)));
    }

    #[test]
    fn array_items_recurse_with_paths() {
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Array])),
            items: Some(Box::new(Validator::from(Descriptor::typed(&[
                DefinitionType::String,
            ])))),
            ..Descriptor::default()
        });
        let (result, exception) = walk(json!(["ok", 5, "fine"]), validator);
        let entries = exception.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "/1");
        // Failed elements are dropped from the materialized list.
        let items = result.unwrap().as_array().unwrap();
        assert_eq!(items.borrow().len(), 2);
    }

    #[test]
    fn panicking_callback_is_reported_in_place() {
        fn explode(_: &WalkCtx) -> bool {
            panic!("callback bug")
        }
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![(
                "name",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::String])),
                    allowed: Some(Computed::Dynamic(explode)),
                    ..Descriptor::default()
                }),
            )],
            ..Descriptor::default()
        });
        let (_, exception) = walk(json!({"name": "x"}), validator);
        assert_eq!(
            exception.entries()[0].1,
            "Unexpected error encountered"
        );
    }

    #[test]
    fn errors_callback_runs_after_materialization() {
        fn cross_field(ctx: &WalkCtx) {
            let result = ctx.result.borrow().clone().unwrap();
            let minimum = result.get("minimum").and_then(|v| v.as_f64());
            let maximum = result.get("maximum").and_then(|v| v.as_f64());
            if let (Some(minimum), Some(maximum)) = (minimum, maximum) {
                if minimum > maximum {
                    ctx.exception
                        .message("Property minimum must be less than or equal to maximum");
                }
            }
        }
        let number = || {
            Validator::from(Descriptor::typed(&[DefinitionType::Number]))
        };
        let validator = Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            properties: vec![("maximum", number()), ("minimum", number())],
            errors: Some(cross_field),
            ..Descriptor::default()
        });
        let (_, exception) = walk(json!({"minimum": 10, "maximum": 5}), validator);
        assert_eq!(
            exception.entries()[0].1,
            "Property minimum must be less than or equal to maximum"
        );
    }
}
