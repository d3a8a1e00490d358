//! Behavioral methods of a materialized Schema node.
//!
//! A [`Schema`] is a cheap handle into the enforcer arena. Every public
//! method is side effect free on the tree, allocates its own seen map for
//! cycle detection over the user value, and reports through an
//! [`Outcome`] instead of failing.
use crate::{
    context::{ComponentId, Graph, SpecVersion},
    data_types::{DataTypeDefinition, DataTypeRegistry, PrimitiveKind},
    exception::Exception,
    value::{Map, Value},
};
use std::{convert::TryFrom, fmt, rc::Rc};

mod deserialize;
mod populate;
mod random;
mod serialize;
pub(crate) mod validate;

pub use populate::{PopulateOptions, Replacement};
pub use random::{OptionsError, RandomOptions};

/// The `(value, exception, warning)` triple returned by Schema methods.
#[derive(Debug)]
pub struct Outcome<T = Value> {
    pub value: Option<T>,
    pub error: Option<Exception>,
    pub warning: Option<Exception>,
}

impl<T> Outcome<T> {
    /// Collect a walk that only reports errors; the warning slot stays empty.
    pub(crate) fn from_error(value: Option<T>, error: Exception) -> Outcome<T> {
        let failed = error.has_exception();
        Outcome {
            value: if failed { None } else { value },
            error: failed.then(|| error),
            warning: None,
        }
    }

    pub(crate) fn collect(value: Option<T>, error: Exception, warning: Exception) -> Outcome<T> {
        Outcome {
            warning: warning.has_exception().then(|| warning),
            ..Outcome::from_error(value, error)
        }
    }

    /// The value on success, the exception otherwise.
    pub fn into_result(self) -> Result<T, Exception> {
        match self.error {
            Some(error) => Err(error),
            None => self
                .value
                .ok_or_else(|| Exception::new("No value produced")),
        }
    }
}

/// A handle to a materialized Schema instance.
#[derive(Clone)]
pub struct Schema {
    pub(crate) graph: Rc<Graph>,
    pub(crate) id: ComponentId,
}

/// How a composite schema combines its sub schemas.
pub(crate) enum Composite {
    AllOf(Vec<Schema>),
    AnyOf(Vec<Schema>),
    OneOf(Vec<Schema>),
    Not(Schema),
}

/// Result of [`Schema::discriminate_details`].
#[derive(Debug)]
pub struct Discriminated {
    /// The discriminator property name.
    pub key: String,
    /// The value found under that property.
    pub name: String,
    /// The schema the name resolved to, when it resolved.
    pub schema: Option<Schema>,
}

/// The walk state a node retains after normalization.
pub struct EnforcerData {
    graph: Rc<Graph>,
}

impl EnforcerData {
    pub fn version(&self) -> SpecVersion {
        self.graph.version
    }

    pub fn major(&self) -> u8 {
        self.graph.version.major
    }

    pub fn minor(&self) -> u8 {
        self.graph.version.minor
    }

    pub fn patch(&self) -> u8 {
        self.graph.version.patch
    }

    /// The normalized root of the walk this node belongs to.
    pub fn root(&self) -> Option<Value> {
        self.graph.root_result.borrow().clone()
    }

    /// The materialized instance for a raw definition node, if any.
    pub fn instance_for(&self, definition: &Value) -> Option<Schema> {
        self.graph
            .instance_for(definition)
            .filter(|id| self.graph.kind(*id) == crate::components::schema::NAME)
            .map(|id| Schema::new(Rc::clone(&self.graph), id))
    }

    /// The data type registry in force for this root.
    pub fn data_types(&self) -> Rc<DataTypeRegistry> {
        Rc::clone(&self.graph.data_types)
    }
}

impl Schema {
    pub(crate) fn new(graph: Rc<Graph>, id: ComponentId) -> Schema {
        Schema { graph, id }
    }

    /// Read a normalized property of this schema node.
    pub fn prop(&self, key: &str) -> Option<Value> {
        self.graph.prop(self.id, key)
    }

    /// The identity of this node within the enforcer arena. Two handles to
    /// the same materialized instance share it.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// The walk context retained by this node.
    pub fn enforcer_data(&self) -> EnforcerData {
        EnforcerData {
            graph: Rc::clone(&self.graph),
        }
    }

    /// The raw definition this node was materialized from.
    pub fn definition(&self) -> Option<Value> {
        self.graph.definition_of(self.id)
    }

    /// Where this node sits within the source document, as a pointer.
    pub fn pointer(&self) -> String {
        self.graph.pointer_of(self.id)
    }

    pub(crate) fn props_map(&self) -> Map {
        self.graph.props(self.id).borrow().clone()
    }

    pub(crate) fn type_name(&self) -> Option<String> {
        self.prop("type").and_then(|value| value.as_str())
    }

    pub(crate) fn format(&self) -> Option<String> {
        self.prop("format").and_then(|value| value.as_str())
    }

    pub(crate) fn primitive_kind(&self) -> Option<PrimitiveKind> {
        self.type_name()
            .and_then(|name| PrimitiveKind::try_from(name.as_str()).ok())
    }

    /// The codec for this schema's `(type, format)`, if registered.
    pub(crate) fn codec(&self) -> Option<Rc<DataTypeDefinition>> {
        let kind = self.primitive_kind()?;
        let format = self.format()?;
        self.graph.data_types.get(kind, &format)
    }

    pub(crate) fn nullable(&self) -> bool {
        self.prop("nullable")
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// A sibling handle for a property value holding a component reference.
    pub(crate) fn subschema(&self, value: &Value) -> Option<Schema> {
        match value {
            Value::Component(id) => Some(Schema::new(Rc::clone(&self.graph), *id)),
            _ => None,
        }
    }

    /// The sub schema for a named object property.
    pub(crate) fn property_schema(&self, name: &str) -> Option<Schema> {
        self.prop("properties")
            .and_then(|properties| properties.get(name))
            .and_then(|value| self.subschema(&value))
    }

    pub(crate) fn items_schema(&self) -> Option<Schema> {
        self.prop("items").and_then(|value| self.subschema(&value))
    }

    pub(crate) fn composite(&self) -> Option<Composite> {
        let list = |value: Value| -> Vec<Schema> {
            value
                .as_array()
                .map(|items| {
                    items
                        .borrow()
                        .iter()
                        .filter_map(|item| self.subschema(item))
                        .collect()
                })
                .unwrap_or_default()
        };
        if let Some(value) = self.prop("allOf") {
            return Some(Composite::AllOf(list(value)));
        }
        if let Some(value) = self.prop("anyOf") {
            return Some(Composite::AnyOf(list(value)));
        }
        if let Some(value) = self.prop("oneOf") {
            return Some(Composite::OneOf(list(value)));
        }
        if let Some(value) = self.prop("not") {
            return self.subschema(&value).map(Composite::Not);
        }
        None
    }

    /// Select the concrete schema a polymorphic value discriminates to.
    pub fn discriminate(&self, value: &Value) -> Option<Schema> {
        self.discriminate_details(value)
            .and_then(|details| details.schema)
    }

    /// As [`Schema::discriminate`], but exposing the property name and the
    /// value it carried.
    pub fn discriminate_details(&self, value: &Value) -> Option<Discriminated> {
        let discriminator = self.prop("discriminator")?;
        let root = self.graph.root_definition.borrow().clone();
        match discriminator {
            // v2: a bare property name resolved against root definitions.
            Value::String(key) => {
                let name = value.get(&key).and_then(|found| found.as_str())?;
                let schema = root
                    .as_ref()
                    .and_then(|root| root.get("definitions"))
                    .and_then(|definitions| definitions.get(&name))
                    .and_then(|definition| self.graph.instance_for(&definition))
                    .map(|id| Schema::new(Rc::clone(&self.graph), id));
                Some(Discriminated { key, name, schema })
            }
            // v3: propertyName plus an optional mapping. The mapping was
            // rewritten to schema instances during the plugins phase.
            Value::Component(id) => {
                let key = self
                    .graph
                    .prop(id, "propertyName")
                    .and_then(|value| value.as_str())?;
                let name = value.get(&key).and_then(|found| found.as_str())?;
                let mapped = self
                    .graph
                    .prop(id, "mapping")
                    .and_then(|mapping| mapping.get(&name))
                    .and_then(|target| self.subschema(&target));
                let schema = mapped.or_else(|| {
                    root.as_ref()
                        .and_then(|root| root.get("components"))
                        .and_then(|components| components.get("schemas"))
                        .and_then(|schemas| schemas.get(&name))
                        .and_then(|definition| self.graph.instance_for(&definition))
                        .map(|id| Schema::new(Rc::clone(&self.graph), id))
                });
                Some(Discriminated { key, name, schema })
            }
            _ => None,
        }
    }

    /// The schema a discriminator mapping entry resolves to. Meaningful
    /// after normalization completes: the plugins phase rewrites mapping
    /// strings into schema instances.
    pub fn discriminator_mapping(&self, name: &str) -> Option<Schema> {
        match self.prop("discriminator")? {
            Value::Component(id) => {
                let target = self.graph.prop(id, "mapping")?.get(name)?;
                self.subschema(&target)
            }
            _ => None,
        }
    }

    /// Convert a value into a plain tree, preserving values whose
    /// constructors are registered. Idempotent on plain trees.
    pub fn formalize(&self, value: &Value) -> Value {
        crate::value::formalize(value)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("id", &self.id)
            .field("type", &self.type_name())
            .finish()
    }
}
