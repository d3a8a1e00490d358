use oas_enforcer::{
    deep_equal, Enforcer, Map, PopulateOptions, RandomOptions, Replacement, Value,
};
use pretty_assertions::assert_eq;
use rand::{rngs::StdRng, SeedableRng};
use serde_json::json;

fn entries(exception: &oas_enforcer::Exception) -> Vec<(String, String)> {
    exception.entries()
}

// -- cycles ------------------------------------------------------------------

#[test]
fn cyclic_definition_collapses_to_one_instance() {
    // A = { type: "object", properties: { self: A } }
    let a = Value::object(Map::new());
    let properties = Value::object(Map::new());
    {
        let map = a.as_object().unwrap();
        map.borrow_mut()
            .insert("type".to_string(), Value::from("object"));
        map.borrow_mut()
            .insert("properties".to_string(), properties.clone());
    }
    properties
        .as_object()
        .unwrap()
        .borrow_mut()
        .insert("self".to_string(), a.clone());

    let outcome = Enforcer::v3().schema_value(a);
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let schema = outcome.value.unwrap();
    let nested = schema
        .prop("properties")
        .and_then(|properties| properties.get("self"))
        .unwrap();
    match nested {
        Value::Component(id) => assert_eq!(id, schema.id()),
        other => panic!("expected a component reference, got {:?}", other),
    }
}

// -- weighted ordering -------------------------------------------------------

#[test]
fn bounds_resolve_after_type_and_format() {
    let outcome = Enforcer::v3().schema(&json!({
        "maximum": 5,
        "type": "integer",
        "format": "int32"
    }));
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let schema = outcome.value.unwrap();
    assert_eq!(schema.prop("maximum").unwrap(), Value::from(5i64));
}

#[test]
fn normalization_is_deterministic() {
    let definition = json!({
        "type": "object",
        "properties": {
            "a": {"type": "integer", "maximum": "oops"},
            "b": {"type": "bogus"}
        }
    });
    let first = Enforcer::v3().schema(&definition);
    let second = Enforcer::v3().schema(&definition);
    assert_eq!(
        entries(first.error.as_ref().unwrap()),
        entries(second.error.as_ref().unwrap())
    );
}

// -- discriminators ----------------------------------------------------------

fn pet_document() -> serde_json::Value {
    json!({
        "openapi": "3.0.3",
        "components": {
            "schemas": {
                "Dog": {
                    "type": "object",
                    "required": ["kind"],
                    "properties": {"kind": {"type": "string"}}
                },
                "Cat": {
                    "type": "object",
                    "required": ["kind"],
                    "properties": {"kind": {"type": "string"}}
                },
                "Pet": {
                    "type": "object",
                    "required": ["kind"],
                    "properties": {"kind": {"type": "string"}},
                    "discriminator": {
                        "propertyName": "kind",
                        "mapping": {"dog": "Dog"}
                    }
                }
            }
        }
    })
}

#[test]
fn v3_discriminator_mapping_points_at_schema_instances() {
    let outcome = Enforcer::v3().document(&pet_document());
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let document = outcome.value.unwrap();
    let pet = document.schema("Pet").unwrap();
    let dog = document.schema("Dog").unwrap();

    assert!(matches!(pet.prop("discriminator"), Some(Value::Component(_))));
    // After the plugins phase the mapping holds the Dog instance itself.
    let target = pet.discriminator_mapping("dog").expect("mapping entry");
    assert_eq!(target.id(), dog.id());

    let value = Value::from(json!({"kind": "dog"}));
    let discriminated = pet.discriminate(&value).unwrap();
    assert_eq!(discriminated.id(), dog.id());

    // Unmapped names fall back to the component schemas by name.
    let value = Value::from(json!({"kind": "Cat"}));
    let discriminated = pet.discriminate(&value).unwrap();
    assert_eq!(discriminated.id(), document.schema("Cat").unwrap().id());
}

#[test]
fn v3_unresolvable_mapping_is_reported() {
    let mut document = pet_document();
    document["components"]["schemas"]["Pet"]["discriminator"]["mapping"]["dog"] =
        json!("Wolf");
    let outcome = Enforcer::v3().document(&document);
    let error = outcome.error.expect("unresolvable mapping");
    let entries = entries(&error);
    assert_eq!(
        entries[0].0,
        "/components/schemas/Pet/discriminator/mapping/dog"
    );
    assert_eq!(entries[0].1, "Reference cannot be resolved: Wolf");
}

#[test]
fn v2_discriminator_resolves_against_definitions() {
    let outcome = Enforcer::v2().document(&json!({
        "swagger": "2.0",
        "definitions": {
            "Dog": {
                "type": "object",
                "required": ["petType"],
                "properties": {"petType": {"type": "string"}}
            },
            "Pet": {
                "type": "object",
                "required": ["petType"],
                "properties": {"petType": {"type": "string"}},
                "discriminator": "petType"
            }
        }
    }));
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    let document = outcome.value.unwrap();
    let pet = document.schema("Pet").unwrap();
    let value = Value::from(json!({"petType": "Dog"}));
    let target = pet.discriminate(&value).unwrap();
    assert_eq!(target.id(), document.schema("Dog").unwrap().id());
}

// -- populate ----------------------------------------------------------------

#[test]
fn populate_with_colon_injector() {
    let schema = Enforcer::v3()
        .schema(&json!({"type": "string", "x-variable": "name"}))
        .into_result()
        .unwrap();
    let mut params = Map::new();
    params.insert("name".to_string(), Value::from("Ada"));
    let options = PopulateOptions {
        replacement: Replacement::Colon,
        ..PopulateOptions::default()
    };
    let outcome = schema.populate(&params, None, options);
    assert_eq!(outcome.value.unwrap(), Value::from("Ada"));
}

#[test]
fn populate_expands_template_defaults() {
    let schema = Enforcer::v3()
        .schema(&json!({"type": "string", "default": ":name"}))
        .into_result()
        .unwrap();
    let mut params = Map::new();
    params.insert("name".to_string(), Value::from("Ada"));
    let options = PopulateOptions {
        replacement: Replacement::Colon,
        ..PopulateOptions::default()
    };
    let outcome = schema.populate(&params, None, options);
    assert_eq!(outcome.value.unwrap(), Value::from("Ada"));
}

#[test]
fn populate_builds_objects_from_variables() {
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "x-variable": "name"},
                "greeting": {"type": "string", "x-template": "Hello, {name}!"}
            }
        }))
        .into_result()
        .unwrap();
    let mut params = Map::new();
    params.insert("name".to_string(), Value::from("Ada"));
    let outcome = schema.populate(&params, None, PopulateOptions::default());
    let value = outcome.value.unwrap();
    assert_eq!(value.get("name").unwrap(), Value::from("Ada"));
    assert_eq!(value.get("greeting").unwrap(), Value::from("Hello, Ada!"));
}

#[test]
fn populate_honors_conditions() {
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "object",
            "properties": {
                "secret": {
                    "type": "string",
                    "x-condition": "includeSecret",
                    "x-variable": "secret"
                }
            }
        }))
        .into_result()
        .unwrap();
    let mut params = Map::new();
    params.insert("secret".to_string(), Value::from("hunter2"));
    params.insert("includeSecret".to_string(), Value::Bool(false));
    let outcome = schema.populate(&params, None, PopulateOptions::default());
    assert!(outcome.value.is_none());
}

// -- composites --------------------------------------------------------------

#[test]
fn multiple_composites_are_rejected() {
    let outcome = Enforcer::v3().schema(&json!({
        "allOf": [{"type": "string"}],
        "oneOf": [{"type": "string"}]
    }));
    let error = outcome.error.expect("composite conflict");
    let messages: Vec<String> = entries(&error).into_iter().map(|(_, m)| m).collect();
    assert!(
        messages.contains(&"Cannot have multiple composites: allOf, oneOf".to_string()),
        "{:?}",
        messages
    );
}

#[test]
fn any_of_is_not_allowed_in_v2() {
    let outcome = Enforcer::v2().schema(&json!({
        "type": "string",
        "anyOf": [{"type": "string"}]
    }));
    let error = outcome.error.expect("anyOf is v3 only");
    assert_eq!(entries(&error)[0].0, "/anyOf");
    assert_eq!(entries(&error)[0].1, "Property not allowed");
}

// -- formats -----------------------------------------------------------------

#[test]
fn unknown_format_warns_at_its_path() {
    let outcome = Enforcer::v3().schema(&json!({"type": "string", "format": "gibberish"}));
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(outcome.value.is_some());
    let warning = outcome.warning.expect("non standard format warning");
    let entries = entries(&warning);
    assert_eq!(entries[0].0, "/format");
    assert_eq!(entries[0].1, "Non standard format used: gibberish");
}

#[test]
fn serialize_then_deserialize_is_identity_for_dates() {
    let schema = Enforcer::v3()
        .schema(&json!({"type": "string", "format": "date"}))
        .into_result()
        .unwrap();
    let date = schema
        .deserialize(&Value::from("2000-01-01"))
        .into_result()
        .unwrap();
    assert!(matches!(date, Value::Date(_)));
    assert!(schema.validate(&date).error.is_none());
    let text = schema.serialize(&date).into_result().unwrap();
    assert_eq!(text, Value::from("2000-01-01"));
    let round_tripped = schema.deserialize(&text).into_result().unwrap();
    assert!(deep_equal(&date, &round_tripped));
}

#[test]
fn serialize_then_deserialize_is_identity_for_bytes() {
    let schema = Enforcer::v3()
        .schema(&json!({"type": "string", "format": "byte"}))
        .into_result()
        .unwrap();
    let bytes = schema
        .deserialize(&Value::from("aGVsbG8="))
        .into_result()
        .unwrap();
    assert!(matches!(bytes, Value::Bytes(_)));
    let text = schema.serialize(&bytes).into_result().unwrap();
    assert_eq!(text, Value::from("aGVsbG8="));
}

#[test]
fn date_bounds_deserialize_and_enforce() {
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "string",
            "format": "date",
            "minimum": "2000-01-01",
            "maximum": "2000-12-31"
        }))
        .into_result()
        .unwrap();
    assert!(matches!(schema.prop("maximum"), Some(Value::Date(_))));
    let inside = schema.deserialize(&Value::from("2000-06-15")).into_result().unwrap();
    assert!(schema.validate(&inside).error.is_none());
    let outside = schema.deserialize(&Value::from("2001-06-15")).into_result().unwrap();
    assert!(schema.validate(&outside).error.is_some());
}

#[test]
fn enum_and_default_values_are_deserialized() {
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "string",
            "format": "date",
            "default": "2000-01-01",
            "enum": ["2000-01-01", "2001-01-01"]
        }))
        .into_result()
        .unwrap();
    assert!(matches!(schema.prop("default"), Some(Value::Date(_))));
    let options = schema.prop("enum").unwrap();
    assert!(matches!(options.index(0), Some(Value::Date(_))));
}

#[test]
fn int32_range_is_enforced() {
    let schema = Enforcer::v3()
        .schema(&json!({"type": "integer", "format": "int32"}))
        .into_result()
        .unwrap();
    assert!(schema.validate(&Value::from(2_147_483_647i64)).error.is_none());
    let error = schema.validate(&Value::from(3_000_000_000i64)).error.unwrap();
    assert_eq!(entries(&error)[0].1, "Value is out of range for format int32");
}

// -- validation boundaries ---------------------------------------------------

#[test]
fn equal_bounds_are_allowed_unless_exclusive() {
    let equal = Enforcer::v3().schema(&json!({
        "type": "integer", "minimum": 5, "maximum": 5
    }));
    assert!(equal.error.is_none(), "{:?}", equal.error);

    let exclusive = Enforcer::v3().schema(&json!({
        "type": "integer", "minimum": 5, "maximum": 5, "exclusiveMinimum": true
    }));
    assert!(exclusive.error.is_some());
}

#[test]
fn min_greater_than_max_is_rejected() {
    let outcome = Enforcer::v3().schema(&json!({
        "type": "array",
        "items": {"type": "string"},
        "minItems": 5,
        "maxItems": 2
    }));
    let error = outcome.error.expect("minItems > maxItems");
    let messages: Vec<String> = entries(&error).into_iter().map(|(_, m)| m).collect();
    assert!(messages
        .contains(&"Property minItems must be less than or equal to property maxItems".to_string()));
}

#[test]
fn read_only_write_only_conflict() {
    let outcome = Enforcer::v3().schema(&json!({
        "type": "string", "readOnly": true, "writeOnly": true
    }));
    let error = outcome.error.expect("conflicting flags");
    let messages: Vec<String> = entries(&error).into_iter().map(|(_, m)| m).collect();
    assert!(messages
        .contains(&"Schema cannot be marked as both readOnly and writeOnly".to_string()));
}

#[test]
fn empty_pattern_reports_and_survives() {
    let outcome = Enforcer::v3().schema(&json!({"type": "string", "pattern": ""}));
    let error = outcome.error.expect("empty pattern");
    let entries = entries(&error);
    assert_eq!(entries[0].0, "/pattern");
    assert_eq!(entries[0].1, "Value must be a non-empty string");
}

#[test]
fn unique_items_uses_deep_equality() {
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "array",
            "uniqueItems": true,
            "items": {
                "type": "object",
                "properties": {"a": {"type": "integer"}}
            }
        }))
        .into_result()
        .unwrap();
    // Deep equal but not identical.
    let value = Value::from(json!([{"a": 1}, {"a": 1}]));
    let error = schema.validate(&value).error.expect("duplicates");
    assert_eq!(entries(&error)[0].0, "/1");
    assert_eq!(entries(&error)[0].1, "Array items must be unique");
}

#[test]
fn error_paths_match_definition_positions() {
    let outcome = Enforcer::v3().document(&json!({
        "openapi": "3.0.3",
        "components": {
            "schemas": {
                "User": {
                    "type": "object",
                    "properties": {
                        "name": {"type": 12}
                    }
                }
            }
        }
    }));
    let error = outcome.error.expect("bad nested type");
    assert_eq!(
        entries(&error)[0].0,
        "/components/schemas/User/properties/name/type"
    );
}

#[test]
fn one_of_validates_exactly_one() {
    let schema = Enforcer::v3()
        .schema(&json!({
            "oneOf": [
                {"type": "integer", "minimum": 0},
                {"type": "integer", "minimum": 10}
            ]
        }))
        .into_result()
        .unwrap();
    // 5 matches only the first branch.
    assert!(schema.validate(&Value::from(5i64)).error.is_none());
    // 15 matches both branches.
    let error = schema.validate(&Value::from(15i64)).error.unwrap();
    assert_eq!(
        entries(&error)[0].1,
        "Value must validate against exactly one schema, but validated against 2"
    );
}

// -- file type (v2) ----------------------------------------------------------

#[test]
fn file_type_is_v2_top_level_only() {
    assert!(Enforcer::v2().schema(&json!({"type": "file"})).error.is_none());
    assert!(Enforcer::v3().schema(&json!({"type": "file"})).error.is_some());
    let nested = Enforcer::v2().schema(&json!({
        "type": "object",
        "properties": {"upload": {"type": "file"}}
    }));
    assert!(nested.error.is_some());
}

// -- random ------------------------------------------------------------------

#[test]
fn random_values_validate_against_their_schema() {
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "object",
            "required": ["id", "name", "tags"],
            "properties": {
                "id": {"type": "integer", "minimum": 1, "maximum": 1000},
                "name": {"type": "string", "minLength": 2, "maxLength": 12},
                "score": {"type": "number", "minimum": 0, "maximum": 1},
                "kind": {"type": "string", "enum": ["cat", "dog"]},
                "tags": {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": 5,
                    "items": {"type": "string", "minLength": 1}
                }
            }
        }))
        .into_result()
        .unwrap();
    for seed in 0..25u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let outcome = schema.random_with(None, &RandomOptions::default(), &mut rng);
        let value = outcome.value.expect("a generated value");
        let validated = schema.validate(&value);
        assert!(
            validated.error.is_none(),
            "seed {}: {:?} -> {}",
            seed,
            value,
            validated.error.unwrap()
        );
    }
}

#[test]
fn random_fills_required_names_outside_properties() {
    // `token` is required but not listed in properties; additional
    // properties default to allowed, so it must still be generated.
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "object",
            "required": ["id", "token"],
            "properties": {
                "id": {"type": "integer", "minimum": 1, "maximum": 100}
            }
        }))
        .into_result()
        .unwrap();
    for seed in 0..10u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let outcome = schema.random_with(None, &RandomOptions::default(), &mut rng);
        let value = outcome.value.expect("a generated value");
        assert!(value.get("token").is_some(), "seed {}: {:?}", seed, value);
        let validated = schema.validate(&value);
        assert!(
            validated.error.is_none(),
            "seed {}: {:?} -> {}",
            seed,
            value,
            validated.error.unwrap()
        );
    }
}

#[test]
fn random_warns_when_unique_items_run_dry() {
    // Booleans only have two distinct values; three unique items cannot
    // exist, so generation stops short and says so.
    let schema = Enforcer::v3()
        .schema(&json!({
            "type": "array",
            "uniqueItems": true,
            "minItems": 3,
            "items": {"type": "boolean"}
        }))
        .into_result()
        .unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let outcome = schema.random_with(None, &RandomOptions::default(), &mut rng);
    let warning = outcome.warning.expect("unique items exhausted");
    assert_eq!(entries(&warning)[0].1, "Unable to generate 3 unique items");
}

#[test]
fn validate_warns_on_deprecated_schemas() {
    let schema = Enforcer::v3()
        .schema(&json!({"type": "string", "deprecated": true}))
        .into_result()
        .unwrap();
    let outcome = schema.validate(&Value::from("still works"));
    assert!(outcome.error.is_none());
    let warning = outcome.warning.expect("deprecated usage");
    assert_eq!(entries(&warning)[0].1, "Value uses a deprecated schema");
}

#[test]
fn random_rejects_out_of_range_possibilities() {
    let schema = Enforcer::v3()
        .schema(&json!({"type": "integer"}))
        .into_result()
        .unwrap();
    let options = RandomOptions {
        defined_property_possibility: 1.2,
        ..RandomOptions::default()
    };
    assert!(schema.random(None, options).is_err());
}

// -- formalize / wrap --------------------------------------------------------

#[test]
fn formalize_is_idempotent_on_plain_trees() {
    let enforcer = Enforcer::v3();
    let value = Value::from(json!({"a": [1, {"b": "c"}], "d": null}));
    let once = enforcer.formalize(&value);
    let twice = enforcer.formalize(&once);
    assert!(deep_equal(&value, &once));
    assert!(deep_equal(&once, &twice));
}

#[test]
fn extract_value_unwraps_markers() {
    let enforcer = Enforcer::v3();
    let wrapped = enforcer.wrap(Value::from("secret"));
    assert_eq!(enforcer.extract_value(&wrapped), Value::from("secret"));
}

#[test]
fn duplicate_data_type_definitions_are_rejected() {
    use oas_enforcer::DataTypeDefinition;
    let enforcer = Enforcer::v3();
    let definition = || {
        DataTypeDefinition::new(
            |_, value| Ok(value.clone()),
            |_, value| Ok(value.clone()),
            |_, _| Ok(()),
        )
    };
    enforcer
        .define_data_type_format("string", "identifier", Some(definition()))
        .unwrap();
    assert!(enforcer
        .define_data_type_format("string", "identifier", Some(definition()))
        .is_err());
    assert!(enforcer
        .define_data_type_format("gibberish", "identifier", Some(definition()))
        .is_err());
}
