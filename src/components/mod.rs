//! Component constructors the normalizer can instantiate.
//!
//! The normalizer never enumerates this set: an [`EnforcerRef`] names a
//! component, the registry supplies its descriptor and init hook.
//!
//! [`EnforcerRef`]: crate::validator::EnforcerRef
use crate::{
    context::{ComponentId, WalkCtx},
    validator::Descriptor,
};
use std::{collections::BTreeMap, rc::Rc};

pub(crate) mod discriminator;
pub(crate) mod schema;

/// A named component: its meta validator plus an optional hook run right
/// after the instance's subtree is materialized.
pub struct ComponentSpec {
    pub name: &'static str,
    pub validator: fn() -> Rc<Descriptor>,
    pub init: Option<fn(&Rc<WalkCtx>, ComponentId)>,
}

/// String keyed dispatch from component name to constructor.
pub type ComponentRegistry = Rc<BTreeMap<&'static str, Rc<ComponentSpec>>>;

/// The components shipped with the crate.
pub fn standard_registry() -> ComponentRegistry {
    let mut registry: BTreeMap<&'static str, Rc<ComponentSpec>> = BTreeMap::new();
    for spec in [schema::spec(), discriminator::spec()] {
        registry.insert(spec.name, Rc::new(spec));
    }
    Rc::new(registry)
}
