use tokio::sync::mpsc::UnboundedSender;
use tracing::Level;

use zonequest_events::{EntityHandle, QuestEvent};

/// Handle slots readable through the `host.handle` import
pub mod slot {
    pub const NPC: i32 = 0;
    pub const MOB: i32 = 1;
    pub const CLIENT: i32 = 2;
    pub const ITEM: i32 = 3;
    pub const BOT: i32 = 4;
    pub const ZONE: i32 = 5;
    pub const ENTITY_LIST: i32 = 6;
    pub const WORLD_SERVER: i32 = 7;
    pub const QUEST_MANAGER: i32 = 8;

    pub const COUNT: usize = 9;
}

/// String fields readable through `host.field_len` / `host.field_read`
pub mod field {
    pub const DATA: i32 = 0;
    pub const ZONE_NAME: i32 = 1;
    pub const ENTITY_NAME: i32 = 2;
    pub const ENCOUNTER_NAME: i32 = 3;

    pub const COUNT: usize = 4;
}

/// Long-lived host objects shared by every event of a zone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostHandles {
    pub zone: EntityHandle,
    pub entity_list: EntityHandle,
    pub world_server: EntityHandle,
    pub quest_manager: EntityHandle,
}

/// A log line written by a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMessage {
    /// Scope of the module that wrote it
    pub scope: String,
    pub level: Level,
    pub message: String,
}

/// Host state attached on host start and detached on shutdown
#[derive(Debug)]
pub struct HostContext {
    zone_name: String,
    handles: HostHandles,
    messages: Option<UnboundedSender<ScriptMessage>>,
}

impl HostContext {
    pub fn new(zone_name: impl Into<String>, handles: HostHandles) -> Self {
        Self {
            zone_name: zone_name.into(),
            handles,
            messages: None,
        }
    }

    /// Forward script log lines to `tx`
    pub fn with_messages(mut self, tx: UnboundedSender<ScriptMessage>) -> Self {
        self.messages = Some(tx);
        self
    }

    pub fn zone_name(&self) -> &str {
        &self.zone_name
    }

    pub fn handles(&self) -> HostHandles {
        self.handles
    }

    pub fn send_message(&self, message: ScriptMessage) {
        if let Some(tx) = &self.messages {
            let _ = tx.send(message);
        }
    }
}

/// Everything a guest can read during one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPayload {
    event_id: i32,
    handles: [u64; slot::COUNT],
    spell_id: u32,
    extra_data: u32,
    fields: [String; field::COUNT],
}

impl EventPayload {
    /// Payload for calls outside an event (constructors, lifecycle hooks)
    pub fn idle(host: &HostContext) -> Self {
        let mut payload = Self {
            event_id: -1,
            ..Default::default()
        };
        payload.apply_host(host);
        payload
    }

    pub fn from_event(event: &QuestEvent, host: &HostContext) -> Self {
        let mut payload = Self::idle(host);
        payload.event_id = event.event_id as i32;
        payload.spell_id = event.spell_id;
        payload.extra_data = event.extra_data;

        let entity = |e: &Option<zonequest_events::EntityRef>| {
            e.as_ref().map(|e| e.handle.0).unwrap_or_default()
        };
        payload.handles[slot::NPC as usize] = entity(&event.npc);
        payload.handles[slot::MOB as usize] = event.mob.map(|h| h.0).unwrap_or_default();
        payload.handles[slot::CLIENT as usize] = entity(&event.client);
        payload.handles[slot::ITEM as usize] = event.item.map(|h| h.0).unwrap_or_default();
        payload.handles[slot::BOT as usize] = entity(&event.bot);

        payload.fields[field::DATA as usize] = event.data.clone();
        payload.fields[field::ENTITY_NAME as usize] = event
            .npc
            .as_ref()
            .or(event.bot.as_ref())
            .or(event.client.as_ref())
            .map(|e| e.name.clone())
            .unwrap_or_default();
        payload.fields[field::ENCOUNTER_NAME as usize] =
            event.encounter_name.clone().unwrap_or_default();
        payload
    }

    fn apply_host(&mut self, host: &HostContext) {
        let handles = host.handles();
        self.handles[slot::ZONE as usize] = handles.zone.0;
        self.handles[slot::ENTITY_LIST as usize] = handles.entity_list.0;
        self.handles[slot::WORLD_SERVER as usize] = handles.world_server.0;
        self.handles[slot::QUEST_MANAGER as usize] = handles.quest_manager.0;
        self.fields[field::ZONE_NAME as usize] = host.zone_name().to_string();
    }

    pub fn event_id(&self) -> i32 {
        self.event_id
    }

    /// Handle in `slot`, 0 for unknown slots
    pub fn handle(&self, slot: i32) -> u64 {
        usize::try_from(slot)
            .ok()
            .and_then(|i| self.handles.get(i))
            .copied()
            .unwrap_or_default()
    }

    pub fn spell_id(&self) -> u32 {
        self.spell_id
    }

    pub fn extra_data(&self) -> u32 {
        self.extra_data
    }

    pub fn field(&self, field: i32) -> Option<&str> {
        usize::try_from(field)
            .ok()
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonequest_events::{EntityRef, EventSubtype, QuestEventId};

    fn host() -> HostContext {
        HostContext::new(
            "qeynos",
            HostHandles {
                zone: EntityHandle(10),
                entity_list: EntityHandle(11),
                world_server: EntityHandle(12),
                quest_manager: EntityHandle(13),
            },
        )
    }

    #[test]
    fn test_payload_from_event() {
        let event = QuestEvent::new(EventSubtype::Npc, QuestEventId::Say)
            .with_npc(EntityRef::new(42, "Guard_Bob01", "Guard_Bob"))
            .with_client(EntityRef::named(7, "Soandso"))
            .with_data("hail")
            .with_extra_data(3);
        let payload = EventPayload::from_event(&event, &host());

        assert_eq!(payload.event_id(), 0);
        assert_eq!(payload.handle(slot::NPC), 42);
        assert_eq!(payload.handle(slot::CLIENT), 7);
        assert_eq!(payload.handle(slot::ITEM), 0);
        assert_eq!(payload.handle(slot::ZONE), 10);
        assert_eq!(payload.handle(slot::QUEST_MANAGER), 13);
        assert_eq!(payload.field(field::DATA), Some("hail"));
        assert_eq!(payload.field(field::ZONE_NAME), Some("qeynos"));
        assert_eq!(payload.field(field::ENTITY_NAME), Some("Guard_Bob01"));
        assert_eq!(payload.extra_data(), 3);
    }

    #[test]
    fn test_idle_payload_and_out_of_range_reads() {
        let payload = EventPayload::idle(&host());
        assert_eq!(payload.event_id(), -1);
        assert_eq!(payload.handle(-1), 0);
        assert_eq!(payload.handle(99), 0);
        assert_eq!(payload.field(4), None);
        assert_eq!(payload.field(field::DATA), Some(""));
    }

    #[test]
    fn test_messages_are_forwarded() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let host = host().with_messages(tx);
        host.send_message(ScriptMessage {
            scope: "qeynos".into(),
            level: Level::INFO,
            message: "hello".into(),
        });
        assert_eq!(rx.try_recv().unwrap().message, "hello");
    }
}
