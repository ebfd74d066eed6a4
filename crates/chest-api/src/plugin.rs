use std::path::{Path, PathBuf};

use chest_core::manager::{ChestManager, ChestSettings, DeployOutcome, LoadReport, LootOutcome};
use chest_core::{ChestRegistry, ChestResult, DeathChest, ExpirationScheduler, WorldPlatform};
use contracts::{BlockPosition, ChestEvent, DeathEvent, PlayerId, PluginConfig, StoreType};

use crate::config::{self, ConfigResult};
use crate::factory::{MigrationReport, StoreFactory};

/// Why a player may touch a chest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Owner,
    Killer,
    /// Chest protection is off.
    Public,
    Denied,
}

impl Access {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Access::Denied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    NotAChest,
    Denied,
    /// The host should show the chest inventory.
    Opened,
    /// The owner's open was turned into a quick loot.
    Looted(LootOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakOutcome {
    NotAChest,
    /// The host must cancel the break.
    Denied,
    Destroyed,
}

/// Host-facing entry point: owns the configuration, the backend factory and
/// the chest manager, and routes host callbacks to lifecycle transitions.
#[derive(Debug)]
pub struct DeathChestPlugin<W: WorldPlatform> {
    config: PluginConfig,
    factory: StoreFactory,
    requested_store: StoreType,
    manager: ChestManager<W>,
    last_load: LoadReport,
}

impl<W: WorldPlatform> DeathChestPlugin<W> {
    /// Open the configured backend (migrating or falling back as needed) and
    /// load persisted chests.
    pub fn enable(config: PluginConfig, data_dir: impl Into<PathBuf>, world: W) -> Self {
        let factory = StoreFactory::new(data_dir);
        let requested_store = config.store_type();
        let opened = factory.open(requested_store);

        let mut manager = ChestManager::new(
            world,
            opened.store,
            ChestRegistry::new(),
            ExpirationScheduler::new(),
            ChestSettings::from(&config),
        );
        let last_load = manager.load_chests();
        log::info!(
            "[DeathChest] enabled with {} datastore, {} chests active",
            manager.store().name(),
            manager.registry().len()
        );

        Self {
            config,
            factory,
            requested_store,
            manager,
            last_load,
        }
    }

    /// Resolve the data directory (honouring the environment override), load
    /// `config.json` from it and enable.
    pub fn enable_from_dir(default_dir: impl Into<PathBuf>, world: W) -> ConfigResult<Self> {
        let data_dir = config::resolve_data_dir(default_dir);
        let config = config::load_or_init(&data_dir)?;
        Ok(Self::enable(config, data_dir, world))
    }

    /// Apply a new configuration. When the backend changes, records move to
    /// the new backend and it replaces the active one.
    pub fn reload(&mut self, config: PluginConfig) -> Vec<MigrationReport> {
        self.manager.set_settings(ChestSettings::from(&config));
        let requested = config.store_type();
        let active = self.manager.store().store_type();
        self.config = config;

        if requested == self.requested_store && active == requested {
            return Vec::new();
        }

        log::info!("[DeathChest] switching datastore from {active} to {requested}");
        self.shutdown_store();
        let opened = self.factory.open(requested);
        let migrations = opened.migrations;
        self.manager.replace_store(opened.store);
        self.requested_store = requested;

        // The registry is authoritative; make sure the new backend holds every live chest.
        let written = self.manager.persist_all();
        log::debug!("[DeathChest] re-persisted {written} chests after switch");
        migrations
    }

    pub fn disable(&mut self) -> ChestResult<()> {
        let store = self.manager.store_mut();
        store.sync()?;
        store.close()?;
        log::info!("[DeathChest] disabled");
        Ok(())
    }

    fn shutdown_store(&mut self) {
        let store = self.manager.store_mut();
        if !store.is_initialized() {
            return;
        }
        if let Err(err) = store.sync() {
            log::warn!("[DataStore] could not sync {} datastore: {err}", store.name());
        }
        if let Err(err) = store.close() {
            log::warn!("[DataStore] could not close {} datastore: {err}", store.name());
        }
    }

    // -----------------------------------------------------------------------
    // Host callbacks
    // -----------------------------------------------------------------------

    pub fn on_player_death(&mut self, death: &DeathEvent) -> ChestResult<DeployOutcome> {
        self.manager.deploy(death)
    }

    pub fn access(&self, chest: &DeathChest, player_id: PlayerId) -> Access {
        if chest.is_owner(Some(player_id)) {
            Access::Owner
        } else if self.config.killer_looting && chest.is_killer(Some(player_id)) {
            Access::Killer
        } else if !self.config.owner_only {
            Access::Public
        } else {
            Access::Denied
        }
    }

    fn access_at(&self, position: &BlockPosition, player_id: PlayerId) -> Option<(DeathChest, Access)> {
        let chest = self.manager.chest_at(position)?;
        let access = self.access(chest, player_id);
        if self.config.debug {
            log::info!(
                "[DeathChest] {player_id} -> chest {} at {position}: {access:?}",
                chest.chest_id()
            );
        }
        Some((chest.clone(), access))
    }

    fn deny(&mut self, chest: &DeathChest, player_id: PlayerId) {
        self.manager.notify(ChestEvent::AccessDenied {
            player_id,
            chest_id: chest.chest_id(),
        });
    }

    pub fn on_chest_open(&mut self, position: &BlockPosition, player_id: PlayerId) -> OpenOutcome {
        let Some((chest, access)) = self.access_at(position, player_id) else {
            return OpenOutcome::NotAChest;
        };

        match access {
            Access::Denied => {
                self.deny(&chest, player_id);
                OpenOutcome::Denied
            }
            Access::Owner if self.config.quick_loot => {
                OpenOutcome::Looted(self.manager.auto_loot(chest.chest_id(), player_id))
            }
            _ => OpenOutcome::Opened,
        }
    }

    pub fn on_block_break(&mut self, position: &BlockPosition, player_id: PlayerId) -> BreakOutcome {
        let Some((chest, access)) = self.access_at(position, player_id) else {
            return BreakOutcome::NotAChest;
        };

        if !access.is_allowed() {
            self.deny(&chest, player_id);
            return BreakOutcome::Denied;
        }
        self.manager.destroy(chest.chest_id());
        BreakOutcome::Destroyed
    }

    /// A player closed a chest inventory. Returns `true` when that left the
    /// chest empty and unwatched, which destroys it.
    pub fn on_inventory_close(&mut self, position: &BlockPosition, player_id: PlayerId) -> bool {
        let Some(chest_id) = self.manager.chest_at(position).map(DeathChest::chest_id) else {
            return false;
        };
        let destroyed = self.manager.destroy_if_empty(chest_id);
        if destroyed && self.config.debug {
            log::info!("[DeathChest] {player_id} emptied chest {chest_id} at {position}");
        }
        destroyed
    }

    /// A block changed outside player control (explosion, piston, fire).
    pub fn on_block_vanished(&mut self, position: &BlockPosition) -> bool {
        self.manager.block_removed(position)
    }

    pub fn tick(&mut self) -> usize {
        self.manager.tick()
    }

    pub fn advance_ticks(&mut self, ticks: u64) -> usize {
        self.manager.advance_ticks(ticks)
    }

    pub fn drain_events(&mut self) -> Vec<ChestEvent> {
        self.manager.drain_events()
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn chest_count(&self) -> usize {
        self.manager.registry().len()
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        self.factory.data_dir()
    }

    pub fn store_type(&self) -> StoreType {
        self.manager.store().store_type()
    }

    pub fn last_load(&self) -> LoadReport {
        self.last_load
    }

    pub fn manager(&self) -> &ChestManager<W> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ChestManager<W> {
        &mut self.manager
    }
}
