//! Headless, in-process world: block grid, containers, players, and ground drops.
//!
//! Used to run the engine without a game server attached (simulation, tooling,
//! tests). Positions that were never set read as air.

use std::collections::{BTreeMap, BTreeSet};

use contracts::{BlockKind, BlockPosition, ItemStack, PlayerId, WorldId, CHEST_SLOTS};

use crate::platform::WorldPlatform;

pub const PLAYER_INVENTORY_SLOTS: usize = 36;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPlayer {
    pub online: bool,
    pub location: Option<BlockPosition>,
    pub inventory: Vec<ItemStack>,
    pub slots: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryWorld {
    now_millis: u64,
    blocks: BTreeMap<BlockPosition, BlockKind>,
    containers: BTreeMap<BlockPosition, Vec<ItemStack>>,
    viewers: BTreeMap<BlockPosition, usize>,
    players: BTreeMap<PlayerId, MemoryPlayer>,
    dropped: Vec<(BlockPosition, ItemStack)>,
    protected: BTreeSet<BlockPosition>,
}

impl MemoryWorld {
    pub fn new(now_millis: u64) -> Self {
        Self {
            now_millis,
            ..Self::default()
        }
    }

    // --- Clock ---

    pub fn set_now(&mut self, now_millis: u64) {
        self.now_millis = now_millis;
    }

    pub fn advance_millis(&mut self, millis: u64) {
        self.now_millis = self.now_millis.saturating_add(millis);
    }

    // --- Terrain ---

    /// Fill a horizontal square layer centred on (`cx`, `cz`).
    pub fn fill_layer(
        &mut self,
        world_id: WorldId,
        y: i32,
        cx: i32,
        cz: i32,
        half_width: i32,
        kind: BlockKind,
    ) {
        for x in (cx - half_width)..=(cx + half_width) {
            for z in (cz - half_width)..=(cz + half_width) {
                self.set_block(&BlockPosition::new(world_id, x, y, z), kind);
            }
        }
    }

    pub fn protect(&mut self, position: BlockPosition) {
        self.protected.insert(position);
    }

    pub fn set_viewers(&mut self, position: BlockPosition, viewers: usize) {
        self.viewers.insert(position, viewers);
    }

    // --- Players ---

    pub fn add_player(&mut self, player_id: PlayerId, location: BlockPosition) {
        self.players.insert(
            player_id,
            MemoryPlayer {
                online: true,
                location: Some(location),
                inventory: Vec::new(),
                slots: PLAYER_INVENTORY_SLOTS,
            },
        );
    }

    pub fn set_online(&mut self, player_id: PlayerId, online: bool) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.online = online;
        }
    }

    /// Restrict how many slots the player's inventory has.
    pub fn set_inventory_slots(&mut self, player_id: PlayerId, slots: usize) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.slots = slots;
        }
    }

    pub fn player(&self, player_id: PlayerId) -> Option<&MemoryPlayer> {
        self.players.get(&player_id)
    }

    pub fn inventory(&self, player_id: PlayerId) -> &[ItemStack] {
        self.players
            .get(&player_id)
            .map(|player| player.inventory.as_slice())
            .unwrap_or(&[])
    }

    // --- Inspection ---

    pub fn dropped(&self) -> &[(BlockPosition, ItemStack)] {
        &self.dropped
    }

    pub fn dropped_at(&self, position: &BlockPosition) -> Vec<&ItemStack> {
        self.dropped
            .iter()
            .filter(|(at, _)| at == position)
            .map(|(_, stack)| stack)
            .collect()
    }
}

/// Merge stacks into `slots`, opening new slots up to `capacity`. Returns what did not fit.
fn insert_stacks(
    slots: &mut Vec<ItemStack>,
    capacity: usize,
    stacks: Vec<ItemStack>,
) -> Vec<ItemStack> {
    let mut leftovers = Vec::new();
    for mut stack in stacks {
        if stack.amount == 0 {
            continue;
        }

        for slot in slots.iter_mut() {
            if stack.amount == 0 {
                break;
            }
            if slot.stacks_with(&stack) {
                let moved = slot.free_space().min(stack.amount);
                slot.amount += moved;
                stack.amount -= moved;
            }
        }

        while stack.amount > 0 && slots.len() < capacity {
            let moved = stack.amount.min(stack.max_stack);
            let mut placed = stack.clone();
            placed.amount = moved;
            slots.push(placed);
            stack.amount -= moved;
        }

        if stack.amount > 0 {
            leftovers.push(stack);
        }
    }
    leftovers
}

impl WorldPlatform for MemoryWorld {
    fn now_millis(&self) -> u64 {
        self.now_millis
    }

    fn block_kind(&self, position: &BlockPosition) -> BlockKind {
        self.blocks
            .get(position)
            .copied()
            .unwrap_or(BlockKind::Air)
    }

    fn set_block(&mut self, position: &BlockPosition, kind: BlockKind) {
        if kind == BlockKind::Chest {
            self.containers.entry(*position).or_default();
        } else {
            self.containers.remove(position);
            self.viewers.remove(position);
        }

        if kind == BlockKind::Air {
            self.blocks.remove(position);
        } else {
            self.blocks.insert(*position, kind);
        }
    }

    fn container_contents(&self, position: &BlockPosition) -> Vec<ItemStack> {
        self.containers.get(position).cloned().unwrap_or_default()
    }

    fn take_container_contents(&mut self, position: &BlockPosition) -> Vec<ItemStack> {
        self.containers
            .get_mut(position)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn add_to_container(
        &mut self,
        position: &BlockPosition,
        stacks: Vec<ItemStack>,
    ) -> Vec<ItemStack> {
        match self.containers.get_mut(position) {
            Some(slots) => insert_stacks(slots, CHEST_SLOTS, stacks),
            None => stacks,
        }
    }

    fn container_viewers(&self, position: &BlockPosition) -> usize {
        self.viewers.get(position).copied().unwrap_or(0)
    }

    fn drop_item(&mut self, position: &BlockPosition, stack: ItemStack) {
        self.dropped.push((*position, stack));
    }

    fn is_player_online(&self, player_id: PlayerId) -> bool {
        self.players
            .get(&player_id)
            .map_or(false, |player| player.online)
    }

    fn player_location(&self, player_id: PlayerId) -> Option<BlockPosition> {
        self.players
            .get(&player_id)
            .filter(|player| player.online)
            .and_then(|player| player.location)
    }

    fn give_to_player(&mut self, player_id: PlayerId, stacks: Vec<ItemStack>) -> Vec<ItemStack> {
        match self.players.get_mut(&player_id) {
            Some(player) => {
                let slots = player.slots;
                insert_stacks(&mut player.inventory, slots, stacks)
            }
            None => stacks,
        }
    }

    fn can_build(&self, _player_id: PlayerId, position: &BlockPosition) -> bool {
        !self.protected.contains(position)
    }
}
