//! Declarative meta-schema descriptors driving normalization.
//!
//! A descriptor field is either a literal or a callback resolved against the
//! walk context at traversal time. Callbacks are plain function pointers:
//! everything they need travels on the context.
use crate::{
    context::WalkCtx,
    value::{DefinitionType, Value},
};
use std::rc::Rc;

/// A literal value or a context dependent callback.
#[derive(Clone)]
pub enum Computed<T> {
    Constant(T),
    Dynamic(fn(&WalkCtx) -> T),
}

impl<T: Clone> Computed<T> {
    pub fn resolve(&self, ctx: &WalkCtx) -> T {
        match self {
            Computed::Constant(value) => value.clone(),
            Computed::Dynamic(callback) => callback(ctx),
        }
    }
}

impl<T> From<T> for Computed<T> {
    fn from(value: T) -> Self {
        Computed::Constant(value)
    }
}

/// A marker requesting that the normalizer instantiate a named component.
#[derive(Clone)]
pub struct EnforcerRef {
    pub component: &'static str,
    /// Inline descriptor override, also consulted for per property
    /// capabilities (weight, allowed, required) and for non object children.
    pub config: Option<Rc<Descriptor>>,
}

impl EnforcerRef {
    pub fn new(component: &'static str) -> EnforcerRef {
        EnforcerRef {
            component,
            config: None,
        }
    }

    pub fn with_config(component: &'static str, config: Descriptor) -> EnforcerRef {
        EnforcerRef {
            component,
            config: Some(Rc::new(config)),
        }
    }
}

/// The validator in force for a node.
#[derive(Clone)]
pub enum Validator {
    /// Literal `true` (free form) or `false` (nothing allowed).
    Any(bool),
    Descriptor(Rc<Descriptor>),
    Ref(EnforcerRef),
    Dynamic(fn(&WalkCtx) -> Validator),
}

impl Validator {
    /// Identity used in the walk's cycle cache. Stable for the lifetime of a
    /// walk: descriptors are reference counted and component names are
    /// static.
    pub(crate) fn identity(&self) -> usize {
        match self {
            Validator::Any(false) => 1,
            Validator::Any(true) => 2,
            Validator::Descriptor(descriptor) => Rc::as_ptr(descriptor) as usize,
            Validator::Ref(reference) => reference.component.as_ptr() as usize,
            Validator::Dynamic(callback) => *callback as usize,
        }
    }

    /// The capability set carrying per property modifiers.
    pub(crate) fn capabilities(&self) -> Option<Rc<Descriptor>> {
        match self {
            Validator::Descriptor(descriptor) => Some(Rc::clone(descriptor)),
            Validator::Ref(reference) => reference.config.clone(),
            _ => None,
        }
    }
}

impl From<Descriptor> for Validator {
    fn from(descriptor: Descriptor) -> Self {
        Validator::Descriptor(Rc::new(descriptor))
    }
}

impl From<EnforcerRef> for Validator {
    fn from(reference: EnforcerRef) -> Self {
        Validator::Ref(reference)
    }
}

/// The capability set of a descriptor node.
#[derive(Clone, Default)]
pub struct Descriptor {
    /// Accepted definition types.
    pub kind: Option<Computed<Vec<DefinitionType>>>,
    /// Allowed literal values.
    pub enum_values: Option<Computed<Vec<Value>>>,
    /// Property validators for structured objects.
    pub properties: Vec<(&'static str, Validator)>,
    /// Element validator for arrays.
    pub items: Option<Box<Validator>>,
    /// Validator applied to every key of a map like object.
    pub additional: Option<Box<Validator>>,
    /// When true the object is copied verbatim.
    pub free_form: Option<Computed<bool>>,
    /// Whether this property must be present. Default: not required.
    pub required: Option<Computed<bool>>,
    /// Whether this property may be present. Default: allowed.
    pub allowed: Option<Computed<bool>>,
    /// When true the property is skipped silently.
    pub ignored: Option<Computed<bool>>,
    /// Synthesized value when the property is absent.
    pub default: Option<Computed<Value>>,
    /// Post processing of the materialized result, e.g. compiling `pattern`.
    pub deserialize: Option<fn(&WalkCtx, Value) -> Result<Value, String>>,
    /// Cross field checks run against the materialized result.
    pub errors: Option<fn(&WalkCtx)>,
    /// Evaluation order: lower weights run first, ties resolve by key.
    pub weight: i32,
}

impl Descriptor {
    pub fn new() -> Descriptor {
        Descriptor::default()
    }

    /// A descriptor accepting exactly the given definition types.
    pub fn typed(kinds: &[DefinitionType]) -> Descriptor {
        Descriptor {
            kind: Some(Computed::Constant(kinds.to_vec())),
            ..Descriptor::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Computed, Descriptor, EnforcerRef, Validator};
    use crate::value::DefinitionType;
    use std::rc::Rc;

    #[test]
    fn computed_constant_resolves_without_context() {
        // Dynamic resolution is exercised through the normalizer tests; the
        // constant side must be context independent by construction.
        match Computed::from(42) {
            Computed::Constant(value) => assert_eq!(value, 42),
            Computed::Dynamic(_) => unreachable!(),
        }
    }

    #[test]
    fn identity_is_stable_per_descriptor() {
        let descriptor = Rc::new(Descriptor::typed(&[DefinitionType::Object]));
        let a = Validator::Descriptor(Rc::clone(&descriptor));
        let b = Validator::Descriptor(descriptor);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), Validator::Any(true).identity());
    }

    #[test]
    fn ref_capabilities_come_from_config() {
        let reference = EnforcerRef::with_config(
            "Schema",
            Descriptor {
                weight: -6,
                ..Descriptor::default()
            },
        );
        let validator = Validator::Ref(reference);
        assert_eq!(validator.capabilities().unwrap().weight, -6);
        assert!(Validator::Ref(EnforcerRef::new("Schema"))
            .capabilities()
            .is_none());
    }
}
