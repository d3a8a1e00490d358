//! The root surface: build an enforcer, normalize definitions, manage the
//! data type registry.
use crate::{
    components::{standard_registry, ComponentRegistry},
    context::{Graph, RefParser, SpecVersion, WalkCtx, WalkState},
    data_types::{DataTypeDefinition, DataTypeRegistry, DefineError, PrimitiveKind},
    exception::Exception,
    normalizer,
    paths::PathChunk,
    schema::{Outcome, Schema},
    validator::{Computed, Descriptor, EnforcerRef, Validator},
    value::{extract_value, formalize, DefinitionType, Value},
};
use std::{convert::TryFrom, rc::Rc};

/// Entry point for enforcing definitions against one OpenAPI version.
pub struct Enforcer {
    version: SpecVersion,
    data_types: Rc<DataTypeRegistry>,
    components: ComponentRegistry,
    ref_parser: Option<Rc<dyn RefParser>>,
    debug: bool,
}

impl Enforcer {
    /// An enforcer for Swagger 2.0 definitions.
    pub fn v2() -> Enforcer {
        Enforcer::with_version(SpecVersion::v2())
    }

    /// An enforcer for OpenAPI 3 definitions.
    pub fn v3() -> Enforcer {
        Enforcer::with_version(SpecVersion::v3())
    }

    pub fn with_version(version: SpecVersion) -> Enforcer {
        Enforcer {
            version,
            data_types: Rc::new(DataTypeRegistry::with_builtins()),
            components: standard_registry(),
            ref_parser: None,
            debug: false,
        }
    }

    /// Let callback panics propagate instead of recording
    /// "Unexpected error encountered".
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Enforcer {
        self.debug = enabled;
        self
    }

    /// Supply the resolver used for `$ref` shaped discriminator mappings.
    #[must_use]
    pub fn ref_parser(mut self, parser: Rc<dyn RefParser>) -> Enforcer {
        self.ref_parser = Some(parser);
        self
    }

    /// Register, or de-register with `None`, a `(type, format)` codec.
    pub fn define_data_type_format(
        &self,
        type_name: &str,
        format: &str,
        definition: Option<DataTypeDefinition>,
    ) -> Result<(), DefineError> {
        let kind = PrimitiveKind::try_from(type_name)
            .map_err(|_| DefineError::InvalidType(type_name.to_string()))?;
        self.data_types.define(kind, format, definition)
    }

    /// Convert a value into a plain tree, preserving values produced by
    /// registered constructors.
    pub fn formalize(&self, value: &Value) -> Value {
        formalize(value)
    }

    /// Recursively strip [`Value::Wrapped`] markers.
    pub fn extract_value(&self, value: &Value) -> Value {
        extract_value(value)
    }

    /// Mark a value as produced by a known constructor.
    pub fn wrap(&self, value: Value) -> Value {
        Value::wrapped(value)
    }

    /// Normalize a schema fragment into a [`Schema`] enforcer.
    pub fn schema(&self, definition: &serde_json::Value) -> Outcome<Schema> {
        self.schema_value(Value::from(definition))
    }

    /// As [`Enforcer::schema`], for definitions that carry shared or cyclic
    /// sub trees (the output of an external `$ref` resolver).
    pub fn schema_value(&self, definition: Value) -> Outcome<Schema> {
        let (result, exception, warning, graph) = self.run(
            definition,
            Validator::Ref(EnforcerRef::new(crate::components::schema::NAME)),
        );
        let schema = result.and_then(|value| match value {
            Value::Component(id) => Some(Schema::new(graph, id)),
            _ => None,
        });
        Outcome::collect(schema, exception, warning)
    }

    /// Normalize a whole document far enough that named schemas materialize
    /// and discriminator back references resolve. Everything outside
    /// `definitions` / `components.schemas` is kept free form; the full root
    /// component set belongs to the surrounding layer.
    pub fn document(&self, definition: &serde_json::Value) -> Outcome<Document> {
        self.document_value(Value::from(definition))
    }

    /// As [`Enforcer::document`], for pre resolved definitions.
    pub fn document_value(&self, definition: Value) -> Outcome<Document> {
        let validator = if self.version.major == 2 {
            Validator::from(Descriptor {
                kind: Some(Computed::Constant(vec![DefinitionType::Object])),
                additional: Some(Box::new(Validator::Dynamic(v2_root_child))),
                ..Descriptor::default()
            })
        } else {
            Validator::from(Descriptor {
                kind: Some(Computed::Constant(vec![DefinitionType::Object])),
                additional: Some(Box::new(Validator::Dynamic(v3_root_child))),
                ..Descriptor::default()
            })
        };
        let (result, exception, warning, graph) = self.run(definition, validator);
        let document = result.map(|root| Document { graph, root });
        Outcome::collect(document, exception, warning)
    }

    fn run(
        &self,
        definition: Value,
        validator: Validator,
    ) -> (Option<Value>, Exception, Exception, Rc<Graph>) {
        let graph = Rc::new(Graph::new(
            self.version,
            Rc::clone(&self.data_types),
            self.ref_parser.clone(),
        ));
        *graph.root_definition.borrow_mut() = Some(definition.clone());
        let state = Rc::new(WalkState::new(
            Rc::clone(&graph),
            Rc::clone(&self.components),
            self.debug,
        ));
        let exception = Exception::new("One or more errors exist in the OpenAPI definition");
        let warning = Exception::new("One or more warnings exist in the OpenAPI definition");
        let ctx = WalkCtx::root(
            Some(definition),
            validator,
            Rc::clone(&state),
            exception.clone(),
            warning.clone(),
        );
        let result = normalizer::normalize(&ctx);
        *graph.root_result.borrow_mut() = result.clone();
        state.drain_plugins();
        (result, exception, warning, graph)
    }
}

fn schema_map() -> Validator {
    Validator::from(Descriptor {
        kind: Some(Computed::Constant(vec![DefinitionType::Object])),
        additional: Some(Box::new(Validator::Ref(EnforcerRef::new(
            crate::components::schema::NAME,
        )))),
        ..Descriptor::default()
    })
}

fn v2_root_child(ctx: &WalkCtx) -> Validator {
    match &ctx.key {
        Some(PathChunk::Property(key)) if &**key == "definitions" => schema_map(),
        _ => Validator::Any(true),
    }
}

fn v3_root_child(ctx: &WalkCtx) -> Validator {
    match &ctx.key {
        Some(PathChunk::Property(key)) if &**key == "components" => Validator::from(Descriptor {
            kind: Some(Computed::Constant(vec![DefinitionType::Object])),
            additional: Some(Box::new(Validator::Dynamic(v3_components_child))),
            ..Descriptor::default()
        }),
        _ => Validator::Any(true),
    }
}

fn v3_components_child(ctx: &WalkCtx) -> Validator {
    match &ctx.key {
        Some(PathChunk::Property(key)) if &**key == "schemas" => schema_map(),
        _ => Validator::Any(true),
    }
}

/// A minimally normalized document: its named schemas are materialized.
pub struct Document {
    graph: Rc<Graph>,
    root: Value,
}

impl Document {
    /// The normalized root value.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Look up a named schema under `definitions` (v2) or
    /// `components.schemas` (v3).
    pub fn schema(&self, name: &str) -> Option<Schema> {
        let container = if self.graph.version.major == 2 {
            self.root.get("definitions")?
        } else {
            self.root.get("components")?.get("schemas")?
        };
        match container.get(name)? {
            Value::Component(id) => Some(Schema::new(Rc::clone(&self.graph), id)),
            _ => None,
        }
    }

    /// The materialized instance for a raw definition node, if any.
    pub fn instance_for(&self, definition: &Value) -> Option<Schema> {
        self.graph
            .instance_for(definition)
            .map(|id| Schema::new(Rc::clone(&self.graph), id))
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.graph.version)
            .finish()
    }
}
