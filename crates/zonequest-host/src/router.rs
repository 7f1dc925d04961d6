//! Event dispatch into the loaded zone and global modules.
//!
//! Resolution follows the naming convention of the script modules: NPCs
//! resolve to a type named after their original spawn name, players to
//! `Player`, items to `Item`, spells to `Spell`, encounters to
//! `Encounter_{name}` and bots to their own name or `Bot`. The zone module
//! wins over the global one wherever both define a handler.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, trace};

use zonequest_events::{EventFamily, QuestEvent, QuestEventId, method_name};

use crate::context::{EventPayload, HostContext};
use crate::state::{CachedInstance, RuntimeState, ScopeKind, ScopeModule};
use crate::wasm::LoadedModule;

/// Fallback NPC type invoked when no entity-specific type handles an event
pub const WILDCARD_NPC: &str = "ALL_NPC";
pub const PLAYER_TYPE: &str = "Player";
pub const ITEM_TYPE: &str = "Item";
pub const SPELL_TYPE: &str = "Spell";
pub const BOT_TYPE: &str = "Bot";
pub const ENCOUNTER_PREFIX: &str = "Encounter_";

/// Where one event goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scope: ScopeKind,
    pub type_name: String,
    /// Entity key for cached instances; `None` means a fresh instance per event
    pub cache_key: Option<String>,
}

impl Target {
    fn cached(scope: ScopeKind, type_name: &str, key: &str) -> Self {
        Self {
            scope,
            type_name: type_name.to_string(),
            cache_key: Some(key.to_string()),
        }
    }

    fn fresh(scope: ScopeKind, type_name: &str) -> Self {
        Self {
            scope,
            type_name: type_name.to_string(),
            cache_key: None,
        }
    }
}

/// Handler presence per scope, as seen by the resolver
pub trait HandlerLookup {
    fn has_handler(&self, scope: ScopeKind, type_name: &str, family: EventFamily, id: QuestEventId) -> bool;
}

/// Strip the `#` marker from a spawn name
fn strip_marker(name: &str) -> String {
    name.replace('#', "").trim().to_string()
}

/// Resolve the single target of `event`, if any
pub fn resolve(
    event: &QuestEvent,
    family: EventFamily,
    id: QuestEventId,
    lookup: &impl HandlerLookup,
) -> Option<Target> {
    let global = event.subtype.is_global();
    let primary = if global { ScopeKind::Global } else { ScopeKind::Zone };
    let has = |scope, type_name: &str| lookup.has_handler(scope, type_name, family, id);

    match family {
        EventFamily::Npc => {
            let npc = event.npc.as_ref()?;
            let marked = npc.type_source().contains('#');
            let type_name = strip_marker(npc.type_source());
            let key = strip_marker(&npc.name);

            // A zone handler takes global events for unmarked NPCs
            if global && !marked && has(ScopeKind::Zone, &type_name) {
                return None;
            }
            if has(primary, &type_name) {
                return Some(Target::cached(primary, &type_name, &key));
            }
            // Marked NPCs arrive through global events but may be scripted per zone
            if marked && has(ScopeKind::Zone, &type_name) {
                return Some(Target::cached(ScopeKind::Zone, &type_name, &key));
            }

            if global && has(ScopeKind::Zone, WILDCARD_NPC) {
                return None;
            }
            has(primary, WILDCARD_NPC).then(|| Target::fresh(primary, WILDCARD_NPC))
        }
        EventFamily::Player => {
            let client = event.client.as_ref()?;
            if global && has(ScopeKind::Zone, PLAYER_TYPE) {
                return None;
            }
            has(primary, PLAYER_TYPE).then(|| Target::cached(primary, PLAYER_TYPE, &client.name))
        }
        EventFamily::Item => [ScopeKind::Zone, ScopeKind::Global]
            .into_iter()
            .find(|scope| has(*scope, ITEM_TYPE))
            .map(|scope| Target::fresh(scope, ITEM_TYPE)),
        EventFamily::Spell => {
            has(ScopeKind::Zone, SPELL_TYPE).then(|| Target::fresh(ScopeKind::Zone, SPELL_TYPE))
        }
        EventFamily::Encounter => {
            let type_name = format!("{}{}", ENCOUNTER_PREFIX, event.encounter_name.as_deref()?);
            has(ScopeKind::Zone, &type_name).then(|| Target::fresh(ScopeKind::Zone, &type_name))
        }
        EventFamily::Bot => {
            let bot = event.bot.as_ref()?;
            let key = strip_marker(&bot.name);
            let named = strip_marker(bot.type_source());

            for type_name in [named.as_str(), BOT_TYPE] {
                if type_name.is_empty() {
                    continue;
                }
                if global && has(ScopeKind::Zone, type_name) {
                    return None;
                }
                if has(primary, type_name) {
                    return Some(Target::cached(primary, type_name, &key));
                }
            }
            None
        }
    }
}

struct LoadedModules<'a> {
    zone: Option<&'a LoadedModule>,
    global: Option<&'a LoadedModule>,
}

impl HandlerLookup for LoadedModules<'_> {
    fn has_handler(&self, scope: ScopeKind, type_name: &str, family: EventFamily, id: QuestEventId) -> bool {
        let module = match scope {
            ScopeKind::Zone => self.zone,
            ScopeKind::Global => self.global,
        };
        module.is_some_and(|m| m.has_handler(type_name, family, id))
    }
}

/// Routes host events into the loaded modules
pub struct EventRouter {
    state: Arc<RuntimeState>,
}

impl EventRouter {
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }

    /// Dispatch one event; never blocks and never fails
    ///
    /// Does nothing while no host is attached, while either scope is
    /// reloading, or when no script handles the event.
    pub fn dispatch(&self, event: &QuestEvent) {
        let Some(host) = self.state.host() else {
            return;
        };
        if self.state.any_reloading() {
            return;
        }

        let family = event.family();
        let Some(id) = event.quest_event_id() else {
            debug!(target: "quest", "Ignoring unknown event id {}", event.event_id);
            return;
        };
        if method_name(family, id).is_none() {
            return;
        }

        let Some(mut zone) = self.state.scope(ScopeKind::Zone).try_module() else {
            return;
        };
        let Some(mut global) = self.state.scope(ScopeKind::Global).try_module() else {
            return;
        };

        let lookup = LoadedModules {
            zone: zone.loaded.as_ref(),
            global: global.loaded.as_ref(),
        };
        let Some(target) = resolve(event, family, id, &lookup) else {
            return;
        };

        let scope = match target.scope {
            ScopeKind::Zone => &mut *zone,
            ScopeKind::Global => &mut *global,
        };
        let scope_name = self.state.scope(target.scope).name();

        let result = catch_unwind(AssertUnwindSafe(|| {
            invoke(scope, &target, event, family, id, &host)
        }));
        let failure = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => panic_message(panic.as_ref()),
        };

        error!(
            target: "quest",
            "Script error in {} event {} ({}) on {}::{}: {}",
            family,
            event.event_id,
            scope_name,
            target.type_name,
            id.handler_name(),
            failure
        );
    }
}

fn invoke(
    scope: &mut ScopeModule,
    target: &Target,
    event: &QuestEvent,
    family: EventFamily,
    id: QuestEventId,
    host: &Arc<HostContext>,
) -> anyhow::Result<()> {
    let ScopeModule { loaded, cache } = scope;
    let Some(module) = loaded.as_mut() else {
        return Ok(());
    };
    let generation = module.generation();

    let instance = match &target.cache_key {
        Some(key) => match cache.get(&target.type_name, key) {
            Some(cached) if cached.generation == generation => cached.handle,
            Some(cached) => {
                cache.remove(&target.type_name, key);
                debug!(
                    target: "quest",
                    "Rejected {} instance for {} from generation {} (current {})",
                    target.type_name,
                    key,
                    cached.generation,
                    generation
                );
                return Ok(());
            }
            None => {
                let Some(handle) = construct(module, &target.type_name, host) else {
                    return Ok(());
                };
                cache.insert(&target.type_name, key, CachedInstance { handle, generation });
                handle
            }
        },
        None => match construct(module, &target.type_name, host) {
            Some(handle) => handle,
            None => return Ok(()),
        },
    };

    trace!(
        target: "quest",
        "Dispatching {} {} to {} instance {}",
        family,
        id,
        target.type_name,
        instance
    );
    let payload = EventPayload::from_event(event, host);
    module.invoke(&target.type_name, family, id, instance, host, payload)?;
    Ok(())
}

/// Construction failures abort the dispatch without an error
fn construct(module: &mut LoadedModule, type_name: &str, host: &Arc<HostContext>) -> Option<i32> {
    match module.construct(type_name, host) {
        Ok(handle) => Some(handle),
        Err(e) => {
            debug!(target: "quest", "Failed to construct {}: {:#}", type_name, e);
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ScopeKind::{Global, Zone};
    use std::collections::HashSet;
    use zonequest_events::{EntityRef, EventSubtype};

    /// Scope -> (type, method) pairs that exist
    #[derive(Default)]
    struct Handlers(HashSet<(ScopeKind, String)>);

    impl Handlers {
        fn with(mut self, scope: ScopeKind, type_name: &str) -> Self {
            self.0.insert((scope, type_name.to_string()));
            self
        }
    }

    impl HandlerLookup for Handlers {
        fn has_handler(&self, scope: ScopeKind, type_name: &str, _: EventFamily, _: QuestEventId) -> bool {
            self.0.contains(&(scope, type_name.to_string()))
        }
    }

    fn npc_event(subtype: EventSubtype, name: &str, orig: &str) -> QuestEvent {
        QuestEvent::new(subtype, QuestEventId::Say).with_npc(EntityRef::new(1, name, orig))
    }

    fn route(event: &QuestEvent, handlers: &Handlers) -> Option<Target> {
        resolve(event, event.family(), event.quest_event_id().unwrap(), handlers)
    }

    #[test]
    fn test_npc_zone_event_uses_zone_type_and_unique_key() {
        let handlers = Handlers::default().with(Zone, "Guard_Bob");
        let event = npc_event(EventSubtype::Npc, "Guard_Bob01", "Guard_Bob");
        assert_eq!(
            route(&event, &handlers),
            Some(Target::cached(Zone, "Guard_Bob", "Guard_Bob01"))
        );
    }

    #[test]
    fn test_global_npc_event_suppressed_by_zone_handler() {
        let handlers = Handlers::default().with(Zone, "Guard_Bob").with(Global, "Guard_Bob");
        let event = npc_event(EventSubtype::GlobalNpc, "Guard_Bob01", "Guard_Bob");
        assert_eq!(route(&event, &handlers), None);
    }

    #[test]
    fn test_global_npc_event_reaches_global_module() {
        let handlers = Handlers::default().with(Global, "Guard_Bob");
        let event = npc_event(EventSubtype::GlobalNpc, "Guard_Bob01", "Guard_Bob");
        assert_eq!(
            route(&event, &handlers),
            Some(Target::cached(Global, "Guard_Bob", "Guard_Bob01"))
        );
    }

    #[test]
    fn test_marked_npc_prefers_global_then_falls_back_to_zone() {
        let event = npc_event(EventSubtype::GlobalNpc, "#Guard_Bob01", "#Guard_Bob");

        let both = Handlers::default().with(Zone, "Guard_Bob").with(Global, "Guard_Bob");
        assert_eq!(
            route(&event, &both),
            Some(Target::cached(Global, "Guard_Bob", "Guard_Bob01"))
        );

        let zone_only = Handlers::default().with(Zone, "Guard_Bob");
        assert_eq!(
            route(&event, &zone_only),
            Some(Target::cached(Zone, "Guard_Bob", "Guard_Bob01"))
        );
    }

    #[test]
    fn test_wildcard_npc() {
        let event = npc_event(EventSubtype::Npc, "a_rat003", "a_rat");
        let handlers = Handlers::default().with(Zone, WILDCARD_NPC);
        assert_eq!(route(&event, &handlers), Some(Target::fresh(Zone, WILDCARD_NPC)));

        let global_event = npc_event(EventSubtype::GlobalNpc, "a_rat003", "a_rat");
        let both = Handlers::default().with(Zone, WILDCARD_NPC).with(Global, WILDCARD_NPC);
        assert_eq!(route(&global_event, &both), None);

        let global_only = Handlers::default().with(Global, WILDCARD_NPC);
        assert_eq!(
            route(&global_event, &global_only),
            Some(Target::fresh(Global, WILDCARD_NPC))
        );
    }

    #[test]
    fn test_concrete_type_wins_over_wildcard() {
        let event = npc_event(EventSubtype::Npc, "a_rat003", "a_rat");
        let handlers = Handlers::default().with(Zone, "a_rat").with(Zone, WILDCARD_NPC);
        assert_eq!(route(&event, &handlers), Some(Target::cached(Zone, "a_rat", "a_rat003")));
    }

    #[test]
    fn test_player_zone_priority() {
        let event = QuestEvent::new(EventSubtype::GlobalPlayer, QuestEventId::EnterZone)
            .with_client(EntityRef::named(5, "Soandso"));

        let zone = Handlers::default().with(Zone, PLAYER_TYPE).with(Global, PLAYER_TYPE);
        assert_eq!(route(&event, &zone), None);

        let global = Handlers::default().with(Global, PLAYER_TYPE);
        assert_eq!(
            route(&event, &global),
            Some(Target::cached(Global, PLAYER_TYPE, "Soandso"))
        );
    }

    #[test]
    fn test_item_falls_back_to_global() {
        let event = QuestEvent::new(EventSubtype::Item, QuestEventId::ItemClick).with_item(9);
        let handlers = Handlers::default().with(Global, ITEM_TYPE);
        assert_eq!(route(&event, &handlers), Some(Target::fresh(Global, ITEM_TYPE)));

        let both = handlers.with(Zone, ITEM_TYPE);
        assert_eq!(route(&event, &both), Some(Target::fresh(Zone, ITEM_TYPE)));
    }

    #[test]
    fn test_spell_and_encounter_are_zone_only() {
        let spell = QuestEvent::new(EventSubtype::Spell, QuestEventId::SpellFade).with_spell(12);
        let global = Handlers::default()
            .with(Global, SPELL_TYPE)
            .with(Global, "Encounter_dragon");
        assert_eq!(route(&spell, &global), None);

        let encounter =
            QuestEvent::new(EventSubtype::Encounter, QuestEventId::EncounterLoad).with_encounter("dragon");
        assert_eq!(route(&encounter, &global), None);

        let zone = Handlers::default().with(Zone, "Encounter_dragon");
        assert_eq!(route(&encounter, &zone), Some(Target::fresh(Zone, "Encounter_dragon")));
    }

    #[test]
    fn test_bot_named_type_then_generic() {
        let event = QuestEvent::new(EventSubtype::Bot, QuestEventId::Say)
            .with_bot(EntityRef::named(3, "Helper"));

        let named = Handlers::default().with(Zone, "Helper").with(Zone, BOT_TYPE);
        assert_eq!(route(&event, &named), Some(Target::cached(Zone, "Helper", "Helper")));

        let generic = Handlers::default().with(Zone, BOT_TYPE);
        assert_eq!(route(&event, &generic), Some(Target::cached(Zone, BOT_TYPE, "Helper")));
    }

    #[test]
    fn test_missing_entity_is_not_routed() {
        let event = QuestEvent::new(EventSubtype::Npc, QuestEventId::Say);
        let handlers = Handlers::default().with(Zone, WILDCARD_NPC);
        assert_eq!(route(&event, &handlers), None);
    }

    const COUNTING_GUARD: &str = r#"
(module
  (import "host" "log" (func $log (param i32 i32 i32)))
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 0))
  (func (export "Guard::new") (result i32)
    (global.set $next (i32.add (global.get $next) (i32.const 1)))
    (global.get $next))
  (func (export "Guard::event_say") (param $self i32)
    (i32.store8 (i32.const 0) (i32.add (i32.const 48) (local.get $self)))
    (call $log (i32.const 2) (i32.const 0) (i32.const 1))))
"#;

    #[test]
    fn test_instance_from_older_generation_is_evicted() {
        use crate::context::HostHandles;
        use crate::hasher::{BuildKey, ContentHash};
        use crate::wasm::{ModuleLoadContext, create_engine};

        let dir = tempfile::TempDir::new().unwrap();
        let artifact = dir.path().join("qeynos-01.wat");
        std::fs::write(&artifact, COUNTING_GUARD).unwrap();

        let engine = create_engine(false).unwrap();
        let module = ModuleLoadContext::new(&engine, dir.path(), "qeynos")
            .unwrap()
            .load(&artifact, BuildKey::new("qeynos", ContentHash::new([1; 32])))
            .unwrap();

        let state = Arc::new(RuntimeState::new("qeynos"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.attach_host(HostContext::new("qeynos", HostHandles::default()).with_messages(tx));
        let generation = state.install(Zone, module);

        let stale = CachedInstance {
            handle: 5,
            generation: generation - 1,
        };
        state.scope(Zone).module().cache.insert("Guard", "Guard01", stale);

        let router = EventRouter::new(state.clone());
        let event = npc_event(EventSubtype::Npc, "Guard01", "Guard");

        router.dispatch(&event);
        assert!(rx.try_recv().is_err());
        assert!(state.scope(Zone).module().cache.is_empty());

        router.dispatch(&event);
        assert_eq!(rx.try_recv().unwrap().message, "1");
        assert_eq!(
            state.scope(Zone).module().cache.get("Guard", "Guard01"),
            Some(CachedInstance { handle: 1, generation })
        );
    }
}
