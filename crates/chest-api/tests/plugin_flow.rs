use std::path::Path;

use chest_api::{BreakOutcome, DeathChestPlugin, OpenOutcome, SqliteDataStore, StoreFactory};
use chest_core::manager::{DeployOutcome, LootOutcome};
use chest_core::store::DataStore;
use chest_core::{MemoryWorld, WorldPlatform};
use contracts::{
    BlockKind, BlockPosition, BlockRecord, ChestBlockRole, ChestEvent, ChestId, ChestRecord,
    DeathEvent, ItemStack, PlayerId, PluginConfig, StoreType, WorldId,
};

const NOW: u64 = 1_700_000_000_000;

struct Setup {
    world: MemoryWorld,
    origin: BlockPosition,
    owner: PlayerId,
    killer: PlayerId,
    stranger: PlayerId,
}

fn setup() -> Setup {
    let world_id = WorldId::random();
    let origin = BlockPosition::new(world_id, 0, 64, 0);
    let (owner, killer, stranger) = (PlayerId::random(), PlayerId::random(), PlayerId::random());

    let mut world = MemoryWorld::new(NOW);
    world.fill_layer(world_id, 63, 0, 0, 8, BlockKind::Solid);
    for player in [owner, killer, stranger] {
        world.add_player(player, origin.offset(2, 0, 2));
    }
    Setup {
        world,
        origin,
        owner,
        killer,
        stranger,
    }
}

fn death(setup: &Setup, stacks: usize) -> DeathEvent {
    DeathEvent {
        player_id: setup.owner,
        killer_id: Some(setup.killer),
        location: setup.origin,
        drops: (0..stacks)
            .map(|i| ItemStack::new(format!("loot_{i}"), 3))
            .collect(),
    }
}

fn enable(config: PluginConfig, dir: &Path, world: MemoryWorld) -> DeathChestPlugin<MemoryWorld> {
    DeathChestPlugin::enable(config, dir, world)
}

fn place(plugin: &mut DeathChestPlugin<MemoryWorld>, setup: &Setup) -> ChestId {
    match plugin.on_player_death(&death(setup, 4)).expect("deploy") {
        DeployOutcome::Placed { chest_id, .. } => chest_id,
        DeployOutcome::NothingToStore => panic!("expected a chest"),
    }
}

#[test]
fn stranger_is_denied_and_owner_quick_loots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = setup();
    let mut plugin = enable(PluginConfig::default(), dir.path(), s.world.clone());
    place(&mut plugin, &s);
    plugin.drain_events();

    assert_eq!(plugin.on_chest_open(&s.origin, s.stranger), OpenOutcome::Denied);
    assert_eq!(plugin.on_block_break(&s.origin, s.stranger), BreakOutcome::Denied);
    assert_eq!(plugin.on_chest_open(&s.origin, s.killer), OpenOutcome::Denied);
    let denied = plugin
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, ChestEvent::AccessDenied { .. }))
        .count();
    assert_eq!(denied, 3);

    assert_eq!(
        plugin.on_chest_open(&s.origin, s.owner),
        OpenOutcome::Looted(LootOutcome::Emptied)
    );
    assert_eq!(plugin.chest_count(), 0);
    assert_eq!(plugin.manager().world().inventory(s.owner).len(), 4);
    assert_eq!(
        plugin.on_chest_open(&s.origin, s.owner),
        OpenOutcome::NotAChest
    );
}

#[test]
fn killer_may_open_when_killer_looting_is_enabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = setup();
    let config = PluginConfig {
        killer_looting: true,
        ..PluginConfig::default()
    };
    let mut plugin = enable(config, dir.path(), s.world.clone());
    place(&mut plugin, &s);

    assert_eq!(plugin.on_chest_open(&s.origin, s.killer), OpenOutcome::Opened);
    assert_eq!(plugin.chest_count(), 1);
}

#[test]
fn chest_emptied_by_hand_is_destroyed_on_close() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = setup();
    let config = PluginConfig {
        killer_looting: true,
        expire_time_minutes: 0,
        ..PluginConfig::default()
    };
    let mut plugin = enable(config, dir.path(), s.world.clone());
    place(&mut plugin, &s);

    assert_eq!(plugin.on_chest_open(&s.origin, s.killer), OpenOutcome::Opened);
    let mut taken = plugin
        .manager_mut()
        .world_mut()
        .take_container_contents(&s.origin);
    let kept = taken.pop().expect("a stack to put back");
    assert!(plugin
        .manager_mut()
        .world_mut()
        .add_to_container(&s.origin, vec![kept])
        .is_empty());
    assert!(!plugin.on_inventory_close(&s.origin, s.killer));
    assert_eq!(plugin.chest_count(), 1);

    plugin
        .manager_mut()
        .world_mut()
        .take_container_contents(&s.origin);
    assert!(plugin.on_inventory_close(&s.origin, s.killer));
    assert_eq!(plugin.chest_count(), 0);
    assert_eq!(plugin.manager().world().block_kind(&s.origin), BlockKind::Air);
    assert!(plugin.manager().world().dropped_at(&s.origin).is_empty());
    assert!(!plugin.on_inventory_close(&s.origin, s.killer));

    let mut store = SqliteDataStore::new(dir.path());
    plugin.disable().expect("disable");
    store.initialize().expect("initialize");
    assert!(store.get_all_chest_records().expect("chests").is_empty());
}

#[test]
fn unprotected_chests_can_be_broken_by_anyone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = setup();
    let config = PluginConfig {
        owner_only: false,
        ..PluginConfig::default()
    };
    let mut plugin = enable(config, dir.path(), s.world.clone());
    place(&mut plugin, &s);

    assert_eq!(plugin.on_block_break(&s.origin, s.stranger), BreakOutcome::Destroyed);
    assert_eq!(plugin.chest_count(), 0);
    assert_eq!(plugin.manager().world().dropped_at(&s.origin).len(), 4);
}

#[test]
fn chests_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = setup();
    let mut plugin = enable(PluginConfig::default(), dir.path(), s.world.clone());
    let chest_id = place(&mut plugin, &s);
    let world = plugin.manager().world().clone();
    plugin.disable().expect("disable");
    drop(plugin);

    let restarted = enable(PluginConfig::default(), dir.path(), world);
    assert_eq!(restarted.chest_count(), 1);
    assert_eq!(restarted.last_load().loaded, 1);
    assert!(restarted.manager().registry().contains(chest_id));
    assert_eq!(restarted.store_type(), StoreType::Sqlite);
}

#[test]
fn chest_expired_while_offline_is_expired_on_enable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut s = setup();
    let chest_id = ChestId::random();
    let block = BlockRecord {
        position: s.origin,
        chest_id,
        role: ChestBlockRole::RightChest,
    };
    s.world.set_block(&s.origin, BlockKind::Chest);

    let mut store = SqliteDataStore::new(dir.path());
    store.initialize().expect("initialize");
    store
        .put_chest_record(&ChestRecord {
            chest_id,
            owner_id: Some(s.owner),
            killer_id: None,
            item_count: 1,
            placement_time: NOW - 120_000,
            expiration_time: NOW - 60_000,
        })
        .expect("chest");
    store.put_block_record(&block).expect("block");
    store.close().expect("close");

    let plugin = enable(PluginConfig::default(), dir.path(), s.world);

    assert_eq!(plugin.last_load().expired, 1);
    assert_eq!(plugin.chest_count(), 0);
    assert_eq!(plugin.manager().world().block_kind(&s.origin), BlockKind::Air);
}

#[test]
fn reload_switches_backend_and_keeps_chests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = setup();
    let mut plugin = enable(PluginConfig::default(), dir.path(), s.world.clone());
    let chest_id = place(&mut plugin, &s);

    let migrations = plugin.reload(PluginConfig {
        storage_type: Some("json".to_string()),
        ..PluginConfig::default()
    });

    assert_eq!(plugin.store_type(), StoreType::Json);
    assert_eq!(migrations.len(), 1);
    assert!(!dir.path().join("deathchests.db").exists());
    assert!(plugin.manager().registry().contains(chest_id));

    let mut json = StoreFactory::new(dir.path()).create(StoreType::Json);
    json.initialize().expect("json");
    assert_eq!(json.get_all_chest_records().expect("chests").len(), 1);
    assert_eq!(json.get_all_block_records().expect("blocks").len(), 2);
}

#[test]
fn reload_with_same_backend_only_updates_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = setup();
    let mut plugin = enable(PluginConfig::default(), dir.path(), s.world.clone());

    let migrations = plugin.reload(PluginConfig {
        expire_time_minutes: 0,
        ..PluginConfig::default()
    });
    assert!(migrations.is_empty());
    assert_eq!(plugin.manager().settings().expire_after_millis, 0);

    place(&mut plugin, &s);
    assert_eq!(plugin.manager().scheduler().pending_len(), 0);
}

#[test]
fn enable_from_dir_writes_default_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    if std::env::var_os(chest_api::DATA_DIR_ENV).is_some() {
        return;
    }
    let plugin =
        DeathChestPlugin::enable_from_dir(dir.path(), setup().world).expect("enable from dir");

    assert_eq!(plugin.config(), &PluginConfig::default());
    assert!(dir.path().join(chest_api::CONFIG_FILE_NAME).exists());
    assert_eq!(plugin.data_dir(), dir.path());
}
