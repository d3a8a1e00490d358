//! Walk state: the per node context flowing through normalization and the
//! arena of materialized component instances.
use crate::{
    components::ComponentRegistry,
    data_types::DataTypeRegistry,
    exception::Exception,
    paths::PathChunk,
    validator::Validator,
    value::{DefinitionType, Map, Value},
};
use ahash::AHashMap;
use std::{cell::RefCell, fmt, rc::Rc};

/// The OpenAPI version being enforced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
pub struct SpecVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl SpecVersion {
    pub const fn v2() -> SpecVersion {
        SpecVersion {
            major: 2,
            minor: 0,
            patch: 0,
        }
    }

    pub const fn v3() -> SpecVersion {
        SpecVersion {
            major: 3,
            minor: 0,
            patch: 3,
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Reference lookup against the pre resolved source document, supplied by the
/// surrounding loader.
pub trait RefParser {
    fn get(&self, reference: &str) -> Option<Value>;
}

/// Index of a materialized component within the arena.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ComponentId(pub(crate) usize);

#[derive(Debug)]
pub(crate) struct ComponentSlot {
    pub(crate) kind: &'static str,
    pub(crate) properties: Rc<RefCell<Map>>,
    pub(crate) definition: Option<Value>,
    pub(crate) pointer: String,
}

/// The arena of enforcer instances plus everything that outlives the walk.
/// Nodes reference one another by [`ComponentId`], which keeps cyclic
/// definitions representable without ownership cycles.
pub struct Graph {
    pub(crate) version: SpecVersion,
    pub(crate) slots: RefCell<Vec<ComponentSlot>>,
    pub(crate) def_to_instance: RefCell<AHashMap<usize, ComponentId>>,
    pub(crate) data_types: Rc<DataTypeRegistry>,
    pub(crate) root_definition: RefCell<Option<Value>>,
    pub(crate) root_result: RefCell<Option<Value>>,
    pub(crate) ref_parser: Option<Rc<dyn RefParser>>,
}

impl Graph {
    pub(crate) fn new(
        version: SpecVersion,
        data_types: Rc<DataTypeRegistry>,
        ref_parser: Option<Rc<dyn RefParser>>,
    ) -> Graph {
        Graph {
            version,
            slots: RefCell::new(Vec::new()),
            def_to_instance: RefCell::new(AHashMap::new()),
            data_types,
            root_definition: RefCell::new(None),
            root_result: RefCell::new(None),
            ref_parser,
        }
    }

    pub(crate) fn allocate(
        &self,
        kind: &'static str,
        definition: Option<Value>,
        pointer: String,
    ) -> ComponentId {
        let mut slots = self.slots.borrow_mut();
        slots.push(ComponentSlot {
            kind,
            properties: Rc::new(RefCell::new(Map::new())),
            definition,
            pointer,
        });
        ComponentId(slots.len() - 1)
    }

    pub(crate) fn kind(&self, id: ComponentId) -> &'static str {
        self.slots.borrow()[id.0].kind
    }

    pub(crate) fn prop(&self, id: ComponentId, key: &str) -> Option<Value> {
        self.slots.borrow()[id.0].properties.borrow().get(key).cloned()
    }

    pub(crate) fn props(&self, id: ComponentId) -> Rc<RefCell<Map>> {
        Rc::clone(&self.slots.borrow()[id.0].properties)
    }

    pub(crate) fn set_prop(&self, id: ComponentId, key: &str, value: Value) {
        self.slots.borrow()[id.0]
            .properties
            .borrow_mut()
            .insert(key.to_string(), value);
    }

    pub(crate) fn set_props(&self, id: ComponentId, properties: Map) {
        *self.slots.borrow()[id.0].properties.borrow_mut() = properties;
    }

    pub(crate) fn definition_of(&self, id: ComponentId) -> Option<Value> {
        self.slots.borrow()[id.0].definition.clone()
    }

    pub(crate) fn pointer_of(&self, id: ComponentId) -> String {
        self.slots.borrow()[id.0].pointer.clone()
    }

    /// The materialized instance for a raw definition, if one exists.
    pub(crate) fn instance_for(&self, definition: &Value) -> Option<ComponentId> {
        definition
            .address()
            .and_then(|address| self.def_to_instance.borrow().get(&address).copied())
    }

    pub(crate) fn register_instance(&self, definition: &Value, id: ComponentId) {
        if let Some(address) = definition.address() {
            self.def_to_instance.borrow_mut().entry(address).or_insert(id);
        }
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("version", &self.version)
            .field("components", &self.slots.borrow().len())
            .finish()
    }
}

type Plugin = Box<dyn FnOnce()>;

/// Per root shared state of one normalization walk.
pub struct WalkState {
    pub(crate) graph: Rc<Graph>,
    pub(crate) components: ComponentRegistry,
    /// Cycle cache: `(definition identity, validator identity)` to the
    /// materialized result.
    pub(crate) seen: RefCell<AHashMap<(usize, usize), Value>>,
    pub(crate) plugins: RefCell<Vec<Plugin>>,
    pub(crate) debug: bool,
}

impl WalkState {
    pub(crate) fn new(graph: Rc<Graph>, components: ComponentRegistry, debug: bool) -> WalkState {
        WalkState {
            graph,
            components,
            seen: RefCell::new(AHashMap::new()),
            plugins: RefCell::new(Vec::new()),
            debug,
        }
    }

    /// Run deferred callbacks until the queue stays empty. Plugins enqueued
    /// by other plugins run in the same drain.
    pub(crate) fn drain_plugins(&self) {
        loop {
            let batch: Vec<Plugin> = self.plugins.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                break;
            }
            tracing::debug!(count = batch.len(), "running deferred plugins");
            for plugin in batch {
                plugin();
            }
        }
    }
}

/// The immutable record flowing through the normalizer. Back references go
/// up the walk only; a node never mutates an ancestor's context.
pub struct WalkCtx {
    pub definition: Option<Value>,
    pub key: Option<PathChunk>,
    pub parent: Option<Rc<WalkCtx>>,
    pub validator: RefCell<Validator>,
    pub result: RefCell<Option<Value>>,
    pub exception: Exception,
    pub warning: Exception,
    pub state: Rc<WalkState>,
}

impl WalkCtx {
    pub(crate) fn root(
        definition: Option<Value>,
        validator: Validator,
        state: Rc<WalkState>,
        exception: Exception,
        warning: Exception,
    ) -> Rc<WalkCtx> {
        Rc::new(WalkCtx {
            definition,
            key: None,
            parent: None,
            validator: RefCell::new(validator),
            result: RefCell::new(None),
            exception,
            warning,
            state,
        })
    }

    /// A child context scoped under `key`.
    pub(crate) fn child(
        self: &Rc<Self>,
        key: impl Into<PathChunk>,
        definition: Option<Value>,
        validator: Validator,
    ) -> Rc<WalkCtx> {
        let key = key.into();
        Rc::new(WalkCtx {
            definition,
            exception: self.exception.at(key.clone()),
            warning: self.warning.at(key.clone()),
            key: Some(key),
            parent: Some(Rc::clone(self)),
            validator: RefCell::new(validator),
            result: RefCell::new(None),
            state: Rc::clone(&self.state),
        })
    }

    /// The same position with a different definition, used when a default is
    /// synthesized for an absent property.
    pub(crate) fn with_definition(self: &Rc<Self>, definition: Value) -> Rc<WalkCtx> {
        Rc::new(WalkCtx {
            definition: Some(definition),
            key: self.key.clone(),
            parent: self.parent.clone(),
            validator: RefCell::new(self.validator.borrow().clone()),
            result: RefCell::new(None),
            exception: self.exception.clone(),
            warning: self.warning.clone(),
            state: Rc::clone(&self.state),
        })
    }

    /// The same position under a different validator, used when a component
    /// instantiation switches to the component's own descriptor.
    pub(crate) fn with_validator(self: &Rc<Self>, validator: Validator) -> Rc<WalkCtx> {
        Rc::new(WalkCtx {
            definition: self.definition.clone(),
            key: self.key.clone(),
            parent: self.parent.clone(),
            validator: RefCell::new(validator),
            result: RefCell::new(None),
            exception: self.exception.clone(),
            warning: self.warning.clone(),
            state: Rc::clone(&self.state),
        })
    }

    /// Classification of the definition under examination. `None` stands for
    /// a value outside the definition domain (native values).
    pub fn definition_type(&self) -> Option<DefinitionType> {
        match &self.definition {
            None => Some(DefinitionType::Undefined),
            Some(definition) => definition.definition_type(),
        }
    }

    pub fn version(&self) -> SpecVersion {
        self.state.graph.version
    }

    pub fn data_types(&self) -> Rc<DataTypeRegistry> {
        Rc::clone(&self.state.graph.data_types)
    }

    /// The partial result of the parent node, readable by callbacks of
    /// later, higher weight properties.
    pub fn parent_result(&self) -> Option<Value> {
        self.parent
            .as_ref()
            .and_then(|parent| parent.result.borrow().clone())
    }

    /// Enqueue deferred work running after the whole tree is materialized.
    /// A panicking plugin is reported at this context's path.
    pub fn enqueue_plugin(&self, callback: impl FnOnce() + 'static) {
        let exception = self.exception.clone();
        let debug = self.state.debug;
        self.state.plugins.borrow_mut().push(Box::new(move || {
            if debug {
                callback();
            } else if std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)).is_err() {
                exception.message("Unexpected error encountered");
            }
        }));
    }
}
