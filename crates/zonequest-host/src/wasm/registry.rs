use std::collections::HashMap;
use tracing::{debug, warn};
use wasmtime::{ExternType, Instance, Module, Store, TypedFunc};

use zonequest_events::{EventFamily, QuestEventId, families_for_method};

use super::load_context::GuestState;

/// Script type whose `init` / `dispose` exports are lifecycle hooks
pub const LIFECYCLE_TYPE: &str = "ZoneLoad";

const CONSTRUCTOR: &str = "new";

pub type HandlerFunc = TypedFunc<i32, ()>;
pub type ConstructorFunc = TypedFunc<(), i32>;
pub type HookFunc = TypedFunc<(), ()>;

/// Export table of one loaded module, built once at load time
///
/// Exports are named `{Type}::{method}`; a method counts as a handler when
/// the method-name tables map it to at least one (family, event) pair.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HashMap<(EventFamily, QuestEventId), HandlerFunc>>,
    constructors: HashMap<String, ConstructorFunc>,
    pub(crate) init: Option<HookFunc>,
    pub(crate) dispose: Option<HookFunc>,
}

impl HandlerRegistry {
    pub(crate) fn build(module: &Module, instance: &Instance, store: &mut Store<GuestState>) -> Self {
        let mut registry = Self::default();

        for export in module.exports() {
            if !matches!(export.ty(), ExternType::Func(_)) {
                continue;
            }
            let name = export.name();
            let Some((type_name, method)) = name.rsplit_once("::") else {
                continue;
            };

            match (type_name, method) {
                (LIFECYCLE_TYPE, "init") => {
                    registry.init = typed(instance, store, name);
                }
                (LIFECYCLE_TYPE, "dispose") => {
                    registry.dispose = typed(instance, store, name);
                }
                (_, CONSTRUCTOR) => {
                    if let Some(func) = typed(instance, store, name) {
                        registry.constructors.insert(type_name.to_string(), func);
                    }
                }
                _ => {
                    let events = families_for_method(method);
                    if events.is_empty() {
                        debug!(target: "quest::reload", "Ignoring export {}", name);
                        continue;
                    }
                    let Some(func) = typed::<i32, ()>(instance, store, name) else {
                        continue;
                    };
                    let entry = registry.handlers.entry(type_name.to_string()).or_default();
                    for (family, id) in events {
                        entry.insert((*family, *id), func.clone());
                    }
                }
            }
        }

        registry
    }

    pub fn handler(
        &self,
        type_name: &str,
        family: EventFamily,
        id: QuestEventId,
    ) -> Option<&HandlerFunc> {
        self.handlers.get(type_name)?.get(&(family, id))
    }

    pub fn has_handler(&self, type_name: &str, family: EventFamily, id: QuestEventId) -> bool {
        self.handler(type_name, family, id).is_some()
    }

    pub(crate) fn constructor(&self, type_name: &str) -> Option<&ConstructorFunc> {
        self.constructors.get(type_name)
    }

    /// Names of every type with at least one handler
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(HashMap::len).sum()
    }
}

fn typed<P, R>(instance: &Instance, store: &mut Store<GuestState>, name: &str) -> Option<TypedFunc<P, R>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    match instance.get_typed_func::<P, R>(&mut *store, name) {
        Ok(func) => Some(func),
        Err(e) => {
            warn!(
                target: "quest::reload",
                "Skipping export {} with unexpected signature: {}",
                name,
                e
            );
            None
        }
    }
}
