use std::collections::HashMap;
use std::sync::LazyLock;

use crate::{EventFamily, QuestEventId};

use QuestEventId::*;

const NPC_EVENTS: &[QuestEventId] = &[
    Say,
    Trade,
    Death,
    Spawn,
    Attack,
    Combat,
    Aggro,
    Slay,
    NpcSlay,
    WaypointArrive,
    WaypointDepart,
    Timer,
    Signal,
    Hp,
    Enter,
    Exit,
    KilledMerit,
    CastOn,
    AggroSay,
    ProximitySay,
    Cast,
    CastBegin,
    TargetChange,
    HateList,
    FeignDeath,
    EnterArea,
    LeaveArea,
    Respawn,
    DeathComplete,
    Tick,
    SpawnZone,
    DeathZone,
];

const PLAYER_EVENTS: &[QuestEventId] = &[
    Say,
    Death,
    Slay,
    NpcSlay,
    Timer,
    Signal,
    EnterZone,
    ClickDoor,
    Loot,
    Zone,
    LevelUp,
    CastOn,
    TaskAccepted,
    TaskStageComplete,
    TaskUpdate,
    TaskComplete,
    TaskFail,
    PlayerPickup,
    PopupResponse,
    EnvironmentalDamage,
    Cast,
    CastBegin,
    TargetChange,
    CombineSuccess,
    CombineFailure,
    GroupChange,
    ForageSuccess,
    ForageFailure,
    FishStart,
    FishSuccess,
    FishFailure,
    ClickObject,
    DiscoverItem,
    Disconnect,
    Connect,
    DuelWin,
    DuelLose,
    Command,
    DropItem,
    DestroyItem,
    FeignDeath,
    EnterArea,
    LeaveArea,
    Respawn,
    DeathComplete,
    UnhandledOpcode,
    UseSkill,
];

const ITEM_EVENTS: &[QuestEventId] = &[
    Timer,
    Loot,
    ItemEnterZone,
    ItemClick,
    ItemClickCast,
    ItemTick,
    DropItem,
    DestroyItem,
    WeaponProc,
    EquipItem,
    UnequipItem,
    AugmentItem,
    UnaugmentItem,
    AugmentInsert,
    AugmentRemove,
    ScaleCalc,
];

const SPELL_EVENTS: &[QuestEventId] = &[
    SpellEffectClient,
    SpellEffectNpc,
    SpellEffectBuffTicClient,
    SpellEffectBuffTicNpc,
    SpellFade,
    SpellEffectTranslocateComplete,
];

const ENCOUNTER_EVENTS: &[QuestEventId] = &[Timer, Signal, EncounterLoad, EncounterUnload];

const BOT_EVENTS: &[QuestEventId] = &[
    Say,
    Trade,
    Death,
    Spawn,
    Attack,
    Combat,
    Aggro,
    Slay,
    NpcSlay,
    Timer,
    Signal,
    Hp,
    CastOn,
    Cast,
    CastBegin,
    TargetChange,
    UseSkill,
    DeathComplete,
];

fn family_events(family: EventFamily) -> &'static [QuestEventId] {
    match family {
        EventFamily::Npc => NPC_EVENTS,
        EventFamily::Player => PLAYER_EVENTS,
        EventFamily::Item => ITEM_EVENTS,
        EventFamily::Spell => SPELL_EVENTS,
        EventFamily::Encounter => ENCOUNTER_EVENTS,
        EventFamily::Bot => BOT_EVENTS,
    }
}

static METHOD_MAPS: LazyLock<HashMap<EventFamily, HashMap<QuestEventId, &'static str>>> =
    LazyLock::new(|| {
        EventFamily::ALL
            .iter()
            .map(|family| {
                let map = family_events(*family)
                    .iter()
                    .map(|id| (*id, id.handler_name()))
                    .collect();
                (*family, map)
            })
            .collect()
    });

static METHOD_INDEX: LazyLock<HashMap<&'static str, Vec<(EventFamily, QuestEventId)>>> =
    LazyLock::new(|| {
        let mut index: HashMap<&'static str, Vec<(EventFamily, QuestEventId)>> = HashMap::new();
        for family in EventFamily::ALL {
            for id in family_events(family) {
                index
                    .entry(id.handler_name())
                    .or_default()
                    .push((family, *id));
            }
        }
        index
    });

/// Look up the method a script type must export to handle `id` in `family`
///
/// Returns `None` when the family does not carry that event at all.
pub fn method_name(family: EventFamily, id: QuestEventId) -> Option<&'static str> {
    METHOD_MAPS.get(&family)?.get(&id).copied()
}

/// Every (family, event) pair handled by an exported method name
pub fn families_for_method(method: &str) -> &'static [(EventFamily, QuestEventId)] {
    METHOD_INDEX
        .get(method)
        .map(|pairs| pairs.as_slice())
        .unwrap_or(&[])
}
