//! Cross-boundary contracts for the chest engine, store backends, and host integrations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod events;

pub use events::{ChestEvent, DeathEvent};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Duration of one platform tick in milliseconds.
pub const TICK_MILLIS: u64 = 50;
pub const MILLIS_PER_MINUTE: u64 = 60_000;

/// Slots in a single container block.
pub const CHEST_SLOTS: usize = 27;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(value: Uuid) -> Self {
                Self(value)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(raw).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identity of one death chest.
    ChestId
);
uuid_id!(
    /// Identity of a player, stable across sessions.
    PlayerId
);
uuid_id!(
    /// Identity of a world (dimension) on the host.
    WorldId
);

// ---------------------------------------------------------------------------
// Positions and blocks
// ---------------------------------------------------------------------------

/// A block position: world identifier plus integer coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPosition {
    pub world_id: WorldId,
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPosition {
    pub const fn new(world_id: WorldId, x: i32, y: i32, z: i32) -> Self {
        Self { world_id, x, y, z }
    }

    pub fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            world_id: self.world_id,
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    pub fn above(&self) -> Self {
        self.offset(0, 1, 0)
    }

    pub fn below(&self) -> Self {
        self.offset(0, -1, 0)
    }

    /// Squared euclidean distance. Positions in different worlds are `i64::MAX` apart.
    pub fn distance_squared(&self, other: &BlockPosition) -> i64 {
        if self.world_id != other.world_id {
            return i64::MAX;
        }
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        let dz = i64::from(self.z - other.z);
        dx * dx + dy * dy + dz * dz
    }
}

impl fmt::Display for BlockPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{},{},{}", self.world_id, self.x, self.y, self.z)
    }
}

/// What the host world reports at a position, reduced to what placement cares about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Air,
    Solid,
    Liquid,
    Foliage,
    Chest,
    Sign,
}

impl BlockKind {
    /// Blocks a chest or sign may overwrite.
    pub fn is_replaceable(self) -> bool {
        matches!(self, BlockKind::Air | BlockKind::Liquid | BlockKind::Foliage)
    }

    /// Blocks that can support a container placed on top of them.
    pub fn is_solid(self) -> bool {
        matches!(self, BlockKind::Solid | BlockKind::Chest)
    }
}

/// Structural role of one block in a death chest.
///
/// The derived `Ord` is the lookup priority: primary container, secondary
/// container, marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChestBlockRole {
    /// Primary container.
    RightChest,
    /// Secondary container of a double chest.
    LeftChest,
    /// Marker sign, attached to the primary container.
    Sign,
}

impl ChestBlockRole {
    /// Order used for location resolution and container lookup.
    pub const PRIORITY_ORDER: [ChestBlockRole; 3] = [
        ChestBlockRole::RightChest,
        ChestBlockRole::LeftChest,
        ChestBlockRole::Sign,
    ];

    /// Order used when releasing blocks. The sign hangs off the primary
    /// container and must go before the block supporting it.
    pub const DESTRUCTION_ORDER: [ChestBlockRole; 3] = [
        ChestBlockRole::Sign,
        ChestBlockRole::RightChest,
        ChestBlockRole::LeftChest,
    ];

    pub fn is_container(self) -> bool {
        matches!(self, ChestBlockRole::RightChest | ChestBlockRole::LeftChest)
    }

    /// The block kind the world should report for a healthy block of this role.
    pub fn expected_kind(self) -> BlockKind {
        match self {
            ChestBlockRole::RightChest | ChestBlockRole::LeftChest => BlockKind::Chest,
            ChestBlockRole::Sign => BlockKind::Sign,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChestBlockRole::RightChest => "right_chest",
            ChestBlockRole::LeftChest => "left_chest",
            ChestBlockRole::Sign => "sign",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "right_chest" => Some(ChestBlockRole::RightChest),
            "left_chest" => Some(ChestBlockRole::LeftChest),
            "sign" => Some(ChestBlockRole::Sign),
            _ => None,
        }
    }
}

impl fmt::Display for ChestBlockRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ItemStack {
    pub item_id: String,
    pub amount: u32,
    pub max_stack: u32,
}

impl ItemStack {
    pub fn new(item_id: impl Into<String>, amount: u32) -> Self {
        Self {
            item_id: item_id.into(),
            amount,
            max_stack: 64,
        }
    }

    /// Whether `other` can be merged into this stack's slot.
    pub fn stacks_with(&self, other: &ItemStack) -> bool {
        self.item_id == other.item_id && self.max_stack == other.max_stack
    }

    pub fn free_space(&self) -> u32 {
        self.max_stack.saturating_sub(self.amount)
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// Durable projection of one chest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChestRecord {
    pub chest_id: ChestId,
    pub owner_id: Option<PlayerId>,
    pub killer_id: Option<PlayerId>,
    pub item_count: u32,
    /// Milliseconds since epoch.
    pub placement_time: u64,
    /// Milliseconds since epoch; 0 means the chest never expires.
    pub expiration_time: u64,
}

/// Durable projection of one block membership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    pub position: BlockPosition,
    pub chest_id: ChestId,
    pub role: ChestBlockRole,
}

// ---------------------------------------------------------------------------
// Store selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    #[default]
    Sqlite,
    Json,
    Memory,
}

impl StoreType {
    pub const ALL: [StoreType; 3] = [StoreType::Sqlite, StoreType::Json, StoreType::Memory];

    /// Case-insensitive match of a configured name. `None` for unknown names.
    pub fn match_name(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(StoreType::Sqlite),
            "json" => Some(StoreType::Json),
            "memory" => Some(StoreType::Memory),
            _ => None,
        }
    }

    /// Resolve a configured name, falling back to the default type.
    pub fn from_config(raw: Option<&str>) -> Self {
        raw.and_then(Self::match_name).unwrap_or_default()
    }

    pub fn display_name(self) -> &'static str {
        match self {
            StoreType::Sqlite => "SQLite",
            StoreType::Json => "JSON",
            StoreType::Memory => "Memory",
        }
    }

    /// Whether records written to this backend survive a restart.
    pub fn is_durable(self) -> bool {
        !matches!(self, StoreType::Memory)
    }

    /// Name of the on-disk artifact, if the backend has one.
    pub fn file_name(self) -> Option<&'static str> {
        match self {
            StoreType::Sqlite => Some("deathchests.db"),
            StoreType::Json => Some("deathchests.json"),
            StoreType::Memory => None,
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PluginConfig {
    pub schema_version: String,
    /// Minutes until a chest expires; zero or negative disables expiration.
    pub expire_time_minutes: i64,
    /// Backend name; unknown or absent values select the default backend.
    pub storage_type: Option<String>,
    pub search_radius: u32,
    pub place_sign: bool,
    /// Only the owner (and the killer, when enabled) may open or break a chest.
    pub owner_only: bool,
    pub killer_looting: bool,
    /// Opening one's own chest transfers its contents instead of showing the inventory.
    pub quick_loot: bool,
    pub debug: bool,
}

impl PluginConfig {
    pub fn store_type(&self) -> StoreType {
        StoreType::from_config(self.storage_type.as_deref())
    }

    /// Expiration delay in milliseconds; zero when expiration is disabled.
    pub fn expire_after_millis(&self) -> u64 {
        if self.expire_time_minutes <= 0 {
            0
        } else {
            (self.expire_time_minutes as u64).saturating_mul(MILLIS_PER_MINUTE)
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            expire_time_minutes: 60,
            storage_type: Some("sqlite".to_string()),
            search_radius: 5,
            place_sign: true,
            owner_only: true,
            killer_looting: false,
            quick_loot: true,
            debug: false,
        }
    }
}
