use serde::{Deserialize, Serialize};

use crate::{EventFamily, EventSubtype, QuestEventId};

/// Opaque identifier of a native host object (zone, entity, item, ...)
///
/// The runtime never dereferences these; they are passed through to scripts
/// untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityHandle(pub u64);

impl EntityHandle {
    pub const NULL: EntityHandle = EntityHandle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// A named entity taking part in an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub handle: EntityHandle,
    /// Unique display name (e.g. `a_rat003`), used as the instance cache key
    pub name: String,
    /// Original spawn name (e.g. `a_rat`), used to resolve the script type
    #[serde(default)]
    pub orig_name: String,
}

impl EntityRef {
    pub fn new(handle: u64, name: impl Into<String>, orig_name: impl Into<String>) -> Self {
        Self {
            handle: EntityHandle(handle),
            name: name.into(),
            orig_name: orig_name.into(),
        }
    }

    /// Entity whose original name equals its display name (players, bots)
    pub fn named(handle: u64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            handle: EntityHandle(handle),
            orig_name: name.clone(),
            name,
        }
    }

    /// Original name, falling back to the display name when unset
    pub fn type_source(&self) -> &str {
        if self.orig_name.is_empty() {
            &self.name
        } else {
            &self.orig_name
        }
    }
}

/// Event record emitted by the host for every quest event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestEvent {
    pub subtype: EventSubtype,
    /// Raw numeric event id, see [`QuestEventId`]
    pub event_id: u32,
    #[serde(default)]
    pub npc: Option<EntityRef>,
    #[serde(default)]
    pub mob: Option<EntityHandle>,
    #[serde(default)]
    pub client: Option<EntityRef>,
    #[serde(default)]
    pub item: Option<EntityHandle>,
    #[serde(default)]
    pub bot: Option<EntityRef>,
    #[serde(default)]
    pub spell_id: u32,
    #[serde(default)]
    pub encounter_name: Option<String>,
    /// Free-form event data (say text, signal payload, ...)
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub extra_data: u32,
}

impl QuestEvent {
    /// Create an event with no entities attached
    pub fn new(subtype: EventSubtype, id: QuestEventId) -> Self {
        Self {
            subtype,
            event_id: id.to_discriminant(),
            npc: None,
            mob: None,
            client: None,
            item: None,
            bot: None,
            spell_id: 0,
            encounter_name: None,
            data: String::new(),
            extra_data: 0,
        }
    }

    pub fn family(&self) -> EventFamily {
        self.subtype.family()
    }

    pub fn quest_event_id(&self) -> Option<QuestEventId> {
        QuestEventId::from_discriminant(self.event_id)
    }

    pub fn with_npc(mut self, npc: EntityRef) -> Self {
        self.npc = Some(npc);
        self
    }

    pub fn with_mob(mut self, mob: u64) -> Self {
        self.mob = Some(EntityHandle(mob));
        self
    }

    pub fn with_client(mut self, client: EntityRef) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_item(mut self, item: u64) -> Self {
        self.item = Some(EntityHandle(item));
        self
    }

    pub fn with_bot(mut self, bot: EntityRef) -> Self {
        self.bot = Some(bot);
        self
    }

    pub fn with_spell(mut self, spell_id: u32) -> Self {
        self.spell_id = spell_id;
        self
    }

    pub fn with_encounter(mut self, name: impl Into<String>) -> Self {
        self.encounter_name = Some(name.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_extra_data(mut self, extra_data: u32) -> Self {
        self.extra_data = extra_data;
        self
    }
}
