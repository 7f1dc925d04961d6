//! Quest event types shared between the zone host and the script runtime
//!
//! This crate defines what the host hands to the runtime: the event record,
//! the event families and the numeric event ids, plus the fixed tables that
//! map an event id to the method name a script type exports to handle it.

mod event_id;
mod method_map;
mod record;

pub use event_id::QuestEventId;
pub use method_map::{families_for_method, method_name};
pub use record::{EntityHandle, EntityRef, QuestEvent};

use serde::{Deserialize, Serialize};

// ============================================================================
// Event Families
// ============================================================================

/// Category of host event, each with its own method-name table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFamily {
    Npc,
    Player,
    Item,
    Spell,
    Encounter,
    Bot,
}

impl EventFamily {
    pub const ALL: [EventFamily; 6] = [
        EventFamily::Npc,
        EventFamily::Player,
        EventFamily::Item,
        EventFamily::Spell,
        EventFamily::Encounter,
        EventFamily::Bot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventFamily::Npc => "npc",
            EventFamily::Player => "player",
            EventFamily::Item => "item",
            EventFamily::Spell => "spell",
            EventFamily::Encounter => "encounter",
            EventFamily::Bot => "bot",
        }
    }
}

impl std::fmt::Display for EventFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event subtype as emitted by the host
///
/// The `Global*` variants are the same families raised through the global
/// quest path; the runtime routes those to the global module unless the
/// zone module already handles them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum EventSubtype {
    Npc = 0,
    GlobalNpc = 1,
    Player = 2,
    GlobalPlayer = 3,
    Item = 4,
    Spell = 5,
    Encounter = 6,
    Bot = 7,
    GlobalBot = 8,
}

impl EventSubtype {
    /// The family this subtype belongs to
    pub fn family(&self) -> EventFamily {
        match self {
            EventSubtype::Npc | EventSubtype::GlobalNpc => EventFamily::Npc,
            EventSubtype::Player | EventSubtype::GlobalPlayer => EventFamily::Player,
            EventSubtype::Item => EventFamily::Item,
            EventSubtype::Spell => EventFamily::Spell,
            EventSubtype::Encounter => EventFamily::Encounter,
            EventSubtype::Bot | EventSubtype::GlobalBot => EventFamily::Bot,
        }
    }

    /// Whether the event was raised through the global quest path
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            EventSubtype::GlobalNpc | EventSubtype::GlobalPlayer | EventSubtype::GlobalBot
        )
    }

    /// Convert a raw host discriminant
    pub fn from_discriminant(id: u32) -> Option<Self> {
        match id {
            0 => Some(EventSubtype::Npc),
            1 => Some(EventSubtype::GlobalNpc),
            2 => Some(EventSubtype::Player),
            3 => Some(EventSubtype::GlobalPlayer),
            4 => Some(EventSubtype::Item),
            5 => Some(EventSubtype::Spell),
            6 => Some(EventSubtype::Encounter),
            7 => Some(EventSubtype::Bot),
            8 => Some(EventSubtype::GlobalBot),
            _ => None,
        }
    }

    pub fn to_discriminant(&self) -> u32 {
        *self as u32
    }
}
