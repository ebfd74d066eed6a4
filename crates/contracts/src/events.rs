//! Events crossing the engine boundary: death input and notifications for the messaging layer.

use serde::{Deserialize, Serialize};

use crate::{BlockPosition, ChestId, ItemStack, PlayerId};

/// A player death reported by the host, carrying the stacks the player dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeathEvent {
    pub player_id: PlayerId,
    pub killer_id: Option<PlayerId>,
    pub location: BlockPosition,
    pub drops: Vec<ItemStack>,
}

/// Notifications produced by chest transitions, consumed by the message renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChestEvent {
    ChestPlaced {
        player_id: PlayerId,
        chest_id: ChestId,
        location: BlockPosition,
    },
    PlacementFailed {
        player_id: PlayerId,
        location: BlockPosition,
    },
    /// Owner notification when a chest times out.
    ChestExpired {
        player_id: PlayerId,
        chest_id: ChestId,
    },
    InventoryFull {
        player_id: PlayerId,
        chest_id: ChestId,
    },
    ChestLooted {
        player_id: PlayerId,
        chest_id: ChestId,
    },
    AccessDenied {
        player_id: PlayerId,
        chest_id: ChestId,
    },
}

impl ChestEvent {
    pub fn player_id(&self) -> PlayerId {
        match self {
            ChestEvent::ChestPlaced { player_id, .. }
            | ChestEvent::PlacementFailed { player_id, .. }
            | ChestEvent::ChestExpired { player_id, .. }
            | ChestEvent::InventoryFull { player_id, .. }
            | ChestEvent::ChestLooted { player_id, .. }
            | ChestEvent::AccessDenied { player_id, .. } => *player_id,
        }
    }
}
