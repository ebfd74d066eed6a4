//! Chest lifecycle: creation, looting, expiration, destruction, and startup load.
//!
//! `ChestManager` owns the registry, the expiration scheduler, the active data
//! store and the world handle. Every transition re-checks that the chest is
//! still registered and silently does nothing when it is not, because another
//! path (timer, player, external block change) may have destroyed it first.

use std::collections::BTreeMap;

use contracts::{
    BlockPosition, BlockRecord, ChestBlockRole, ChestEvent, ChestId, DeathEvent, ItemStack,
    PlayerId, PluginConfig, CHEST_SLOTS,
};

use crate::chest::DeathChest;
use crate::error::{ChestError, ChestResult};
use crate::planner::AssemblyPlanner;
use crate::platform::WorldPlatform;
use crate::registry::ChestRegistry;
use crate::scheduler::ExpirationScheduler;
use crate::store::DataStore;

/// Tunables the lifecycle reads on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChestSettings {
    /// 0 disables expiration.
    pub expire_after_millis: u64,
    pub search_radius: u32,
    pub place_sign: bool,
}

impl Default for ChestSettings {
    fn default() -> Self {
        ChestSettings::from(&PluginConfig::default())
    }
}

impl From<&PluginConfig> for ChestSettings {
    fn from(config: &PluginConfig) -> Self {
        Self {
            expire_after_millis: config.expire_after_millis(),
            search_radius: config.search_radius,
            place_sign: config.place_sign,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// The player dropped nothing.
    NothingToStore,
    Placed {
        chest_id: ChestId,
        /// Stacks that did not fit and were dropped at the death location.
        overflow: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LootOutcome {
    /// The chest was already gone.
    Absent,
    /// Everything was transferred and the chest destroyed.
    Emptied,
    /// The player's inventory filled up; leftovers stayed in the chest.
    Retained { leftover_stacks: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub expired: usize,
    pub discarded_chests: usize,
    pub discarded_blocks: usize,
}

#[derive(Debug)]
pub struct ChestManager<W: WorldPlatform> {
    world: W,
    registry: ChestRegistry,
    scheduler: ExpirationScheduler,
    store: Box<dyn DataStore>,
    settings: ChestSettings,
    events: Vec<ChestEvent>,
}

impl<W: WorldPlatform> ChestManager<W> {
    pub fn new(
        world: W,
        store: Box<dyn DataStore>,
        registry: ChestRegistry,
        scheduler: ExpirationScheduler,
        settings: ChestSettings,
    ) -> Self {
        Self {
            world,
            registry,
            scheduler,
            store,
            settings,
            events: Vec::new(),
        }
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn registry(&self) -> &ChestRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &ExpirationScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &dyn DataStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn DataStore {
        self.store.as_mut()
    }

    /// Swap the active backend, returning the previous one.
    pub fn replace_store(&mut self, store: Box<dyn DataStore>) -> Box<dyn DataStore> {
        std::mem::replace(&mut self.store, store)
    }

    pub fn settings(&self) -> &ChestSettings {
        &self.settings
    }

    /// New settings apply to chests created afterwards; armed timers are kept.
    pub fn set_settings(&mut self, settings: ChestSettings) {
        self.settings = settings;
    }

    pub fn events(&self) -> &[ChestEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<ChestEvent> {
        std::mem::take(&mut self.events)
    }

    /// Queue a notification raised outside the lifecycle (e.g. an access decision).
    pub fn notify(&mut self, event: ChestEvent) {
        self.events.push(event);
    }

    pub fn chest(&self, chest_id: ChestId) -> Option<&DeathChest> {
        self.registry.get(chest_id)
    }

    pub fn chest_at(&self, position: &BlockPosition) -> Option<&DeathChest> {
        self.registry.lookup_by_position(position)
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create, register and persist a chest on already-chosen positions.
    /// World blocks are not touched.
    pub fn create_chest(
        &mut self,
        owner_id: PlayerId,
        killer_id: Option<PlayerId>,
        blocks: &[(ChestBlockRole, BlockPosition)],
    ) -> ChestResult<ChestId> {
        let now = self.world.now_millis();
        let chest = DeathChest::new(
            Some(owner_id),
            killer_id,
            now,
            self.settings.expire_after_millis,
        );
        let chest_id = self.admit(chest, blocks, now)?;
        self.persist(chest_id);
        Ok(chest_id)
    }

    /// Handle a player death: plan a site, claim it, build the chest and fill it.
    ///
    /// When no site is found every drop is left on the ground at the death
    /// location and `NoValidLocation` is returned.
    pub fn deploy(&mut self, death: &DeathEvent) -> ChestResult<DeployOutcome> {
        if death.drops.is_empty() {
            return Ok(DeployOutcome::NothingToStore);
        }

        let planner = AssemblyPlanner::new(self.settings.search_radius, self.settings.place_sign);
        let needs_double = death.drops.len() > CHEST_SLOTS;
        let placed = planner
            .plan(
                &self.world,
                &self.registry,
                death.player_id,
                &death.location,
                needs_double,
            )
            .and_then(|plan| {
                let now = self.world.now_millis();
                let chest = DeathChest::new(
                    Some(death.player_id),
                    death.killer_id,
                    now,
                    self.settings.expire_after_millis,
                );
                let blocks = plan.blocks();
                self.admit(chest, &blocks, now).map(|chest_id| (chest_id, blocks))
            });

        let (chest_id, blocks) = match placed {
            Ok(placed) => placed,
            Err(err) => {
                log::warn!(
                    "[ChestDeploy:{}] could not place chest at {}: {err}",
                    death.player_id,
                    death.location
                );
                for stack in death.drops.iter().cloned() {
                    self.world.drop_item(&death.location, stack);
                }
                self.events.push(ChestEvent::PlacementFailed {
                    player_id: death.player_id,
                    location: death.location,
                });
                return Err(err);
            }
        };

        for (role, position) in &blocks {
            self.world.set_block(position, role.expected_kind());
        }

        let mut remaining = death.drops.clone();
        for (role, position) in &blocks {
            if remaining.is_empty() {
                break;
            }
            if role.is_container() {
                remaining = self.world.add_to_container(position, remaining);
            }
        }

        let overflow = remaining.len();
        for stack in remaining {
            self.world.drop_item(&death.location, stack);
        }

        let stored = self.item_total(chest_id) as u32;
        if let Some(chest) = self.registry.get_mut(chest_id) {
            chest.set_item_count(stored);
        }
        self.persist(chest_id);

        let location = blocks
            .first()
            .map(|(_, position)| *position)
            .unwrap_or(death.location);
        log::info!(
            "[ChestDeploy:{}] placed chest {chest_id} at {location} ({} blocks, {stored} stacks, {overflow} overflow)",
            death.player_id,
            blocks.len()
        );
        self.events.push(ChestEvent::ChestPlaced {
            player_id: death.player_id,
            chest_id,
            location,
        });

        Ok(DeployOutcome::Placed { chest_id, overflow })
    }

    /// Arm the expiration (unless already past) and register. On failure
    /// nothing stays armed.
    fn admit(
        &mut self,
        mut chest: DeathChest,
        blocks: &[(ChestBlockRole, BlockPosition)],
        now: u64,
    ) -> ChestResult<ChestId> {
        let chest_id = chest.chest_id();
        if !chest.is_expired_at(now) {
            if let Some(ticks) = chest.ticks_until_expiration(now) {
                chest.expire_task = Some(self.scheduler.schedule(chest_id, ticks));
            }
        }

        let task = chest.expire_task;
        if let Err(err) = self.registry.register(chest, blocks) {
            if let Some(task) = task {
                self.scheduler.cancel(task);
            }
            return Err(err);
        }
        Ok(chest_id)
    }

    /// Write every live chest to the active store. Returns how many chests were written.
    pub fn persist_all(&mut self) -> usize {
        let ids: Vec<ChestId> = self.registry.all().map(|chest| chest.chest_id()).collect();
        for chest_id in &ids {
            self.persist(*chest_id);
        }
        ids.len()
    }

    fn persist(&mut self, chest_id: ChestId) {
        let Some(chest) = self.registry.get(chest_id) else {
            return;
        };
        let record = chest.to_record();

        if let Err(err) = self.store.put_chest_record(&record) {
            log::error!(
                "[DataStore] could not write chest {chest_id} to {} datastore: {err}",
                self.store.name()
            );
            return;
        }
        for block in self.registry.blocks_of(chest_id) {
            if let Err(err) = self.store.put_block_record(&block) {
                log::error!(
                    "[DataStore] could not write block {} of chest {chest_id}: {err}",
                    block.position
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Primary container, else secondary, else sign.
    pub fn location(&self, chest_id: ChestId) -> Option<BlockPosition> {
        self.registry
            .blocks_of(chest_id)
            .first()
            .map(|block| block.position)
    }

    fn container_positions(&self, chest_id: ChestId) -> Vec<BlockPosition> {
        self.registry
            .blocks_of(chest_id)
            .into_iter()
            .filter(|block| block.role.is_container())
            .map(|block| block.position)
            .collect()
    }

    /// Players viewing the chest inventory (primary container, else secondary).
    pub fn viewer_count(&self, chest_id: ChestId) -> usize {
        self.container_positions(chest_id)
            .first()
            .map_or(0, |position| self.world.container_viewers(position))
    }

    /// Stacks currently held across the chest's containers.
    pub fn item_total(&self, chest_id: ChestId) -> usize {
        self.container_positions(chest_id)
            .iter()
            .map(|position| self.world.container_contents(position).len())
            .sum()
    }

    /// Put stacks into the chest, containers in priority order. Returns what did not fit.
    pub fn fill(&mut self, chest_id: ChestId, stacks: Vec<ItemStack>) -> Vec<ItemStack> {
        let mut remaining = stacks;
        for position in self.container_positions(chest_id) {
            if remaining.is_empty() {
                break;
            }
            remaining = self.world.add_to_container(&position, remaining);
        }
        remaining
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Move every stack from the chest into the player's inventory.
    pub fn auto_loot(&mut self, chest_id: ChestId, player_id: PlayerId) -> LootOutcome {
        if !self.registry.contains(chest_id) {
            return LootOutcome::Absent;
        }

        let mut remaining = Vec::new();
        for position in self.container_positions(chest_id) {
            let contents = self.world.take_container_contents(&position);
            if contents.is_empty() {
                continue;
            }
            remaining.extend(self.world.give_to_player(player_id, contents));
        }

        if remaining.is_empty() {
            self.events.push(ChestEvent::ChestLooted {
                player_id,
                chest_id,
            });
            self.destroy(chest_id);
            return LootOutcome::Emptied;
        }

        self.events.push(ChestEvent::InventoryFull {
            player_id,
            chest_id,
        });

        let leftover_stacks = remaining.len();
        let unplaced = self.fill(chest_id, remaining);
        if !unplaced.is_empty() {
            let drop_at = self
                .world
                .player_location(player_id)
                .or_else(|| self.location(chest_id));
            match drop_at {
                Some(position) => {
                    log::warn!(
                        "[ChestLoot:{chest_id}] {} stacks fit neither player nor chest; dropping at {position}",
                        unplaced.len()
                    );
                    for stack in unplaced {
                        self.world.drop_item(&position, stack);
                    }
                }
                None => log::error!(
                    "[ChestLoot:{chest_id}] {} stacks could not be placed anywhere",
                    unplaced.len()
                ),
            }
        }

        if self.item_total(chest_id) == 0 {
            self.destroy(chest_id);
            return LootOutcome::Emptied;
        }

        LootOutcome::Retained { leftover_stacks }
    }

    /// Destroy a chest that was emptied by hand once nobody is looking at it.
    pub fn destroy_if_empty(&mut self, chest_id: ChestId) -> bool {
        if !self.registry.contains(chest_id)
            || self.item_total(chest_id) > 0
            || self.viewer_count(chest_id) > 0
        {
            return false;
        }
        log::info!("[ChestLoot:{chest_id}] emptied by hand");
        self.destroy(chest_id)
    }

    /// Expire a chest: destroy it and notify the owner if they are online.
    pub fn expire(&mut self, chest_id: ChestId) -> bool {
        let Some(chest) = self.registry.get(chest_id) else {
            log::debug!("[ChestExpire:{chest_id}] already gone");
            return false;
        };

        let online_owner = chest
            .owner_id()
            .filter(|owner| self.world.is_player_online(*owner));

        self.destroy(chest_id);
        log::info!("[ChestExpire:{chest_id}] expired");

        if let Some(player_id) = online_owner {
            self.events.push(ChestEvent::ChestExpired {
                player_id,
                chest_id,
            });
        }
        true
    }

    /// The terminal transition. Returns `false` if the chest was already destroyed.
    pub fn destroy(&mut self, chest_id: ChestId) -> bool {
        if !self.registry.contains(chest_id) {
            return false;
        }

        let blocks = self.registry.blocks_of(chest_id);
        for role in ChestBlockRole::DESTRUCTION_ORDER {
            if let Some(block) = blocks.iter().find(|block| block.role == role) {
                self.release_block(block);
            }
        }

        if let Err(err) = self.store.delete_chest_record(chest_id) {
            log::error!("[DataStore] could not delete chest {chest_id}: {err}");
        }

        if let Some(task) = self.registry.get(chest_id).and_then(DeathChest::expire_task) {
            self.scheduler.cancel(task);
        }

        self.registry.deregister(chest_id);
        log::info!("[ChestDestroy:{chest_id}] destroyed");
        true
    }

    /// Clear one block in the world, dropping container contents where it stood.
    fn release_block(&mut self, block: &BlockRecord) {
        if self.world.block_kind(&block.position) != block.role.expected_kind() {
            log::debug!(
                "[ChestDestroy:{}] {} at {} already changed in world",
                block.chest_id,
                block.role,
                block.position
            );
            return;
        }

        if block.role.is_container() {
            for stack in self.world.take_container_contents(&block.position) {
                self.world.drop_item(&block.position, stack);
            }
        }
        self.world
            .set_block(&block.position, contracts::BlockKind::Air);
    }

    /// Reconcile a block the world reports as gone. A lost container takes
    /// the whole chest with it; a lost sign only drops its membership.
    pub fn block_removed(&mut self, position: &BlockPosition) -> bool {
        let Some(block) = self.registry.block_at(position) else {
            return false;
        };

        if block.role.is_container() {
            log::info!(
                "[ChestReconcile:{}] container at {position} vanished",
                block.chest_id
            );
            self.destroy(block.chest_id);
        } else {
            self.registry.remove_block(position);
            if let Err(err) = self.store.delete_block_record(position) {
                log::error!("[DataStore] could not delete block {position}: {err}");
            }
        }
        true
    }

    /// Advance the expiration clock, expiring every chest that came due.
    pub fn advance_ticks(&mut self, ticks: u64) -> usize {
        let mut expired = 0;
        for entry in self.scheduler.advance(ticks) {
            let armed = self
                .registry
                .get(entry.chest_id)
                .and_then(DeathChest::expire_task);
            if armed == Some(entry.handle) && self.expire(entry.chest_id) {
                expired += 1;
            }
        }
        expired
    }

    pub fn tick(&mut self) -> usize {
        self.advance_ticks(1)
    }

    // -----------------------------------------------------------------------
    // Startup
    // -----------------------------------------------------------------------

    /// Rebuild the registry from the store, re-arming timers and expiring
    /// chests whose expiration passed while the process was down.
    pub fn load_chests(&mut self) -> LoadReport {
        let mut report = LoadReport::default();
        let now = self.world.now_millis();

        let chest_records = match self.store.get_all_chest_records() {
            Ok(records) => records,
            Err(err) => {
                log::error!("[ChestLoad] could not read chest records: {err}");
                return report;
            }
        };
        let block_records = match self.store.get_all_block_records() {
            Ok(records) => records,
            Err(err) => {
                log::error!("[ChestLoad] could not read block records: {err}");
                return report;
            }
        };

        let known: std::collections::BTreeSet<ChestId> =
            chest_records.iter().map(|record| record.chest_id).collect();
        let mut blocks_by_chest: BTreeMap<ChestId, Vec<(ChestBlockRole, BlockPosition)>> =
            BTreeMap::new();

        for block in block_records {
            let stale = !known.contains(&block.chest_id)
                || self.world.block_kind(&block.position) != block.role.expected_kind();
            if stale {
                log::warn!(
                    "[ChestLoad] dropping stale {} record at {} for chest {}",
                    block.role,
                    block.position,
                    block.chest_id
                );
                if let Err(err) = self.store.delete_block_record(&block.position) {
                    log::error!("[DataStore] could not delete block {}: {err}", block.position);
                }
                report.discarded_blocks += 1;
                continue;
            }
            blocks_by_chest
                .entry(block.chest_id)
                .or_default()
                .push((block.role, block.position));
        }

        for record in chest_records {
            let blocks = blocks_by_chest.remove(&record.chest_id).unwrap_or_default();
            if !blocks.iter().any(|(role, _)| role.is_container()) {
                self.discard_loaded(&record.chest_id, &blocks);
                report.discarded_chests += 1;
                continue;
            }

            let chest = DeathChest::from_record(&record);
            let already_expired = chest.is_expired_at(now);
            match self.admit(chest, &blocks, now) {
                Ok(chest_id) if already_expired => {
                    self.expire(chest_id);
                    report.expired += 1;
                }
                Ok(_) => report.loaded += 1,
                Err(err) => {
                    log::warn!("[ChestLoad] chest {} rejected: {err}", record.chest_id);
                    if !matches!(err, ChestError::AlreadyRegistered(_)) {
                        if let Err(err) = self.store.delete_chest_record(record.chest_id) {
                            log::error!(
                                "[DataStore] could not delete chest {}: {err}",
                                record.chest_id
                            );
                        }
                    }
                    report.discarded_chests += 1;
                }
            }
        }

        log::info!(
            "[ChestLoad] loaded {} chests, expired {}, discarded {} chests and {} blocks",
            report.loaded,
            report.expired,
            report.discarded_chests,
            report.discarded_blocks
        );
        report
    }

    /// Remove a persisted chest that has no container left, clearing any sign it still has.
    fn discard_loaded(&mut self, chest_id: &ChestId, blocks: &[(ChestBlockRole, BlockPosition)]) {
        log::warn!("[ChestLoad] chest {chest_id} has no container block; discarding");
        for (role, position) in blocks {
            if self.world.block_kind(position) == role.expected_kind() {
                self.world.set_block(position, contracts::BlockKind::Air);
            }
        }
        if let Err(err) = self.store.delete_chest_record(*chest_id) {
            log::error!("[DataStore] could not delete chest {chest_id}: {err}");
        }
    }
}
