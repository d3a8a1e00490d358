//! The v3 discriminator component.
//!
//! `mapping` values are strings while the tree is being built; a deferred
//! plugin rewrites them to the materialized Schema instances once every
//! component exists, so consumers never see a definition where an instance
//! belongs.
use crate::{
    components::ComponentSpec,
    context::{ComponentId, WalkCtx},
    validator::{Computed, Descriptor, Validator},
    value::{DefinitionType, Value},
};
use std::rc::Rc;

pub(crate) const NAME: &str = "Discriminator";

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
                "propertyName",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::String])),
                    required: Some(Computed::Constant(true)),
                    ..Descriptor::default()
                }),
            ),
            (
                "mapping",
                Validator::from(Descriptor {
                    kind: Some(Computed::Constant(vec![DefinitionType::Object])),
                    additional: Some(Box::new(Validator::from(Descriptor::typed(&[
                        DefinitionType::String,
                    ])))),
                    ..Descriptor::default()
                }),
            ),
        ],
        ..Descriptor::default()
    })
}

fn init(ctx: &Rc<WalkCtx>, id: ComponentId) {
    let graph = Rc::clone(&ctx.state.graph);
    let exception = ctx.exception.clone();
    ctx.enqueue_plugin(move || {
        let mapping = match graph.prop(id, "mapping").and_then(|value| value.as_object()) {
            Some(mapping) => mapping,
            None => return,
        };
        let entries: Vec<(String, Value)> = mapping
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for (key, value) in entries {
            let target = match value.as_str() {
                Some(target) => target,
                None => continue,
            };
            let definition = if target.contains('/') {
                graph
                    .ref_parser
                    .as_ref()
                    .and_then(|parser| parser.get(&target))
            } else {
                graph
                    .root_definition
                    .borrow()
                    .as_ref()
                    .and_then(|root| root.get("components"))
                    .and_then(|components| components.get("schemas"))
                    .and_then(|schemas| schemas.get(&target))
            };
            match definition.and_then(|definition| graph.instance_for(&definition)) {
                Some(instance) => {
                    mapping
                        .borrow_mut()
                        .insert(key, Value::Component(instance));
                }
                None => exception
                    .at("mapping")
                    .at(key.as_str())
                    .message(format!("Reference cannot be resolved: {}", target)),
            }
        }
    });
}
