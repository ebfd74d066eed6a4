//! Chest registry: the canonical in-memory index of live chests and the
//! positions they occupy, keyed both ways.

use std::collections::{BTreeMap, BTreeSet};

use contracts::{BlockPosition, BlockRecord, ChestBlockRole, ChestId};

use crate::chest::DeathChest;
use crate::error::{ChestError, ChestResult};

#[derive(Debug, Clone, Default)]
pub struct ChestRegistry {
    chests: BTreeMap<ChestId, DeathChest>,
    blocks_by_position: BTreeMap<BlockPosition, BlockRecord>,
    /// Role-keyed, so iteration follows `ChestBlockRole` priority.
    blocks_by_chest: BTreeMap<ChestId, BTreeMap<ChestBlockRole, BlockPosition>>,
}

impl ChestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chest with its block positions.
    ///
    /// Every position is validated before anything is inserted, so a failed
    /// registration leaves the registry untouched.
    pub fn register(
        &mut self,
        chest: DeathChest,
        blocks: &[(ChestBlockRole, BlockPosition)],
    ) -> ChestResult<()> {
        let chest_id = chest.chest_id();
        if self.chests.contains_key(&chest_id) {
            return Err(ChestError::AlreadyRegistered(chest_id));
        }
        if blocks.is_empty() {
            return Err(ChestError::InvalidAssembly(format!(
                "chest {chest_id} has no blocks"
            )));
        }

        let mut roles = BTreeSet::new();
        let mut positions = BTreeSet::new();
        for (role, position) in blocks {
            if !roles.insert(*role) {
                return Err(ChestError::InvalidAssembly(format!(
                    "chest {chest_id} lists role {role} twice"
                )));
            }
            if !positions.insert(*position) {
                return Err(ChestError::Conflict {
                    position: *position,
                    claimed_by: chest_id,
                });
            }
            if let Some(existing) = self.blocks_by_position.get(position) {
                return Err(ChestError::Conflict {
                    position: *position,
                    claimed_by: existing.chest_id,
                });
            }
        }

        let mut by_role = BTreeMap::new();
        for (role, position) in blocks {
            self.blocks_by_position.insert(
                *position,
                BlockRecord {
                    position: *position,
                    chest_id,
                    role: *role,
                },
            );
            by_role.insert(*role, *position);
        }
        self.blocks_by_chest.insert(chest_id, by_role);
        self.chests.insert(chest_id, chest);
        Ok(())
    }

    /// Remove a chest and every block it owns. Returns the chest if it was live.
    pub fn deregister(&mut self, chest_id: ChestId) -> Option<DeathChest> {
        if let Some(by_role) = self.blocks_by_chest.remove(&chest_id) {
            for position in by_role.values() {
                self.blocks_by_position.remove(position);
            }
        }
        self.chests.remove(&chest_id)
    }

    pub fn lookup_by_position(&self, position: &BlockPosition) -> Option<&DeathChest> {
        self.blocks_by_position
            .get(position)
            .and_then(|block| self.chests.get(&block.chest_id))
    }

    pub fn block_at(&self, position: &BlockPosition) -> Option<BlockRecord> {
        self.blocks_by_position.get(position).copied()
    }

    pub fn is_claimed(&self, position: &BlockPosition) -> bool {
        self.blocks_by_position.contains_key(position)
    }

    /// Blocks of a chest ordered primary, secondary, marker. Empty when the chest is absent.
    pub fn blocks_of(&self, chest_id: ChestId) -> Vec<BlockRecord> {
        self.blocks_by_chest
            .get(&chest_id)
            .map(|by_role| {
                by_role
                    .iter()
                    .map(|(role, position)| BlockRecord {
                        position: *position,
                        chest_id,
                        role: *role,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn block_for_role(&self, chest_id: ChestId, role: ChestBlockRole) -> Option<BlockPosition> {
        self.blocks_by_chest
            .get(&chest_id)
            .and_then(|by_role| by_role.get(&role))
            .copied()
    }

    /// Drop a single block membership, leaving the chest registered.
    pub fn remove_block(&mut self, position: &BlockPosition) -> Option<BlockRecord> {
        let block = self.blocks_by_position.remove(position)?;
        if let Some(by_role) = self.blocks_by_chest.get_mut(&block.chest_id) {
            by_role.remove(&block.role);
        }
        Some(block)
    }

    pub fn get(&self, chest_id: ChestId) -> Option<&DeathChest> {
        self.chests.get(&chest_id)
    }

    pub(crate) fn get_mut(&mut self, chest_id: ChestId) -> Option<&mut DeathChest> {
        self.chests.get_mut(&chest_id)
    }

    pub fn contains(&self, chest_id: ChestId) -> bool {
        self.chests.contains_key(&chest_id)
    }

    /// Snapshot of every live chest at call time.
    pub fn all(&self) -> impl Iterator<Item = DeathChest> {
        self.chests.values().cloned().collect::<Vec<_>>().into_iter()
    }

    pub fn len(&self) -> usize {
        self.chests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chests.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.blocks_by_position.len()
    }
}
