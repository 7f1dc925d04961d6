use serde::{Deserialize, Serialize};

macro_rules! quest_event_ids {
    ($($variant:ident = $value:literal => $method:literal,)+) => {
        /// Numeric quest event id as raised by the host
        ///
        /// The discriminants are part of the host contract and must not be
        /// reordered.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u32)]
        pub enum QuestEventId {
            $($variant = $value,)+
        }

        impl QuestEventId {
            pub const ALL: &'static [QuestEventId] = &[$(QuestEventId::$variant,)+];

            /// Convert a raw host discriminant
            pub fn from_discriminant(id: u32) -> Option<Self> {
                match id {
                    $($value => Some(QuestEventId::$variant),)+
                    _ => None,
                }
            }

            /// Method name a script type exports to handle this event
            pub fn handler_name(&self) -> &'static str {
                match self {
                    $(QuestEventId::$variant => $method,)+
                }
            }
        }
    };
}

quest_event_ids! {
    Say = 0 => "event_say",
    Trade = 1 => "event_trade",
    Death = 2 => "event_death",
    Spawn = 3 => "event_spawn",
    Attack = 4 => "event_attack",
    Combat = 5 => "event_combat",
    Aggro = 6 => "event_aggro",
    Slay = 7 => "event_slay",
    NpcSlay = 8 => "event_npc_slay",
    WaypointArrive = 9 => "event_waypoint_arrive",
    WaypointDepart = 10 => "event_waypoint_depart",
    Timer = 11 => "event_timer",
    Signal = 12 => "event_signal",
    Hp = 13 => "event_hp",
    Enter = 14 => "event_enter",
    Exit = 15 => "event_exit",
    EnterZone = 16 => "event_enter_zone",
    ClickDoor = 17 => "event_click_door",
    Loot = 18 => "event_loot",
    Zone = 19 => "event_zone",
    LevelUp = 20 => "event_level_up",
    KilledMerit = 21 => "event_killed_merit",
    CastOn = 22 => "event_cast_on",
    TaskAccepted = 23 => "event_task_accepted",
    TaskStageComplete = 24 => "event_task_stage_complete",
    TaskUpdate = 25 => "event_task_update",
    TaskComplete = 26 => "event_task_complete",
    TaskFail = 27 => "event_task_fail",
    AggroSay = 28 => "event_aggro_say",
    PlayerPickup = 29 => "event_player_pickup",
    PopupResponse = 30 => "event_popup_response",
    EnvironmentalDamage = 31 => "event_environmental_damage",
    ProximitySay = 32 => "event_proximity_say",
    Cast = 33 => "event_cast",
    CastBegin = 34 => "event_cast_begin",
    ScaleCalc = 35 => "event_scale_calc",
    ItemEnterZone = 36 => "event_item_enter_zone",
    TargetChange = 37 => "event_target_change",
    HateList = 38 => "event_hate_list",
    SpellEffectClient = 39 => "event_spell_effect_client",
    SpellEffectNpc = 40 => "event_spell_effect_npc",
    SpellEffectBuffTicClient = 41 => "event_spell_effect_buff_tic_client",
    SpellEffectBuffTicNpc = 42 => "event_spell_effect_buff_tic_npc",
    SpellFade = 43 => "event_spell_fade",
    SpellEffectTranslocateComplete = 44 => "event_spell_effect_translocate_complete",
    CombineSuccess = 45 => "event_combine_success",
    CombineFailure = 46 => "event_combine_failure",
    ItemClick = 47 => "event_item_click",
    ItemClickCast = 48 => "event_item_click_cast",
    GroupChange = 49 => "event_group_change",
    ForageSuccess = 50 => "event_forage_success",
    ForageFailure = 51 => "event_forage_failure",
    FishStart = 52 => "event_fish_start",
    FishSuccess = 53 => "event_fish_success",
    FishFailure = 54 => "event_fish_failure",
    ClickObject = 55 => "event_click_object",
    DiscoverItem = 56 => "event_discover_item",
    Disconnect = 57 => "event_disconnect",
    Connect = 58 => "event_connect",
    ItemTick = 59 => "event_item_tick",
    DuelWin = 60 => "event_duel_win",
    DuelLose = 61 => "event_duel_lose",
    EncounterLoad = 62 => "event_encounter_load",
    EncounterUnload = 63 => "event_encounter_unload",
    Command = 64 => "event_command",
    DropItem = 65 => "event_drop_item",
    DestroyItem = 66 => "event_destroy_item",
    FeignDeath = 67 => "event_feign_death",
    WeaponProc = 68 => "event_weapon_proc",
    EquipItem = 69 => "event_equip_item",
    UnequipItem = 70 => "event_unequip_item",
    AugmentItem = 71 => "event_augment_item",
    UnaugmentItem = 72 => "event_unaugment_item",
    AugmentInsert = 73 => "event_augment_insert",
    AugmentRemove = 74 => "event_augment_remove",
    EnterArea = 75 => "event_enter_area",
    LeaveArea = 76 => "event_leave_area",
    Respawn = 77 => "event_respawn",
    DeathComplete = 78 => "event_death_complete",
    UnhandledOpcode = 79 => "event_unhandled_opcode",
    Tick = 80 => "event_tick",
    SpawnZone = 81 => "event_spawn_zone",
    DeathZone = 82 => "event_death_zone",
    UseSkill = 83 => "event_use_skill",
}

impl QuestEventId {
    pub fn to_discriminant(&self) -> u32 {
        *self as u32
    }
}

impl std::fmt::Display for QuestEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.to_discriminant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_dense() {
        for (index, id) in QuestEventId::ALL.iter().enumerate() {
            assert_eq!(id.to_discriminant() as usize, index);
            assert_eq!(QuestEventId::from_discriminant(index as u32), Some(*id));
        }
        assert_eq!(QuestEventId::from_discriminant(10_000), None);
    }

    #[test]
    fn test_handler_names_are_unique() {
        let mut names: Vec<_> = QuestEventId::ALL.iter().map(|id| id.handler_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), QuestEventId::ALL.len());
        assert!(names.iter().all(|name| name.starts_with("event_")));
    }
}
