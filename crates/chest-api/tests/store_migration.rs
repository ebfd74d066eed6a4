use std::fs;
use std::path::Path;

use chest_api::{JsonDataStore, SqliteDataStore, StoreFactory};
use chest_core::store::DataStore;
use contracts::{
    BlockPosition, BlockRecord, ChestBlockRole, ChestId, ChestRecord, PlayerId, StoreType, WorldId,
};

fn chest_record(seed: u64) -> ChestRecord {
    ChestRecord {
        chest_id: ChestId::random(),
        owner_id: Some(PlayerId::random()),
        killer_id: if seed % 2 == 0 { Some(PlayerId::random()) } else { None },
        item_count: seed as u32 + 1,
        placement_time: 1_000 * seed,
        expiration_time: 1_000 * seed + 3_600_000,
    }
}

/// Five chests owning twelve blocks: two double chests with signs, three singles with signs.
fn legacy_records() -> (Vec<ChestRecord>, Vec<BlockRecord>) {
    let world_id = WorldId::random();
    let chests: Vec<ChestRecord> = (0..5).map(chest_record).collect();
    let mut blocks = Vec::new();

    for (i, chest) in chests.iter().enumerate() {
        let primary = BlockPosition::new(world_id, i as i32 * 4, 64, 0);
        blocks.push(BlockRecord {
            position: primary,
            chest_id: chest.chest_id,
            role: ChestBlockRole::RightChest,
        });
        blocks.push(BlockRecord {
            position: primary.above(),
            chest_id: chest.chest_id,
            role: ChestBlockRole::Sign,
        });
        if i < 2 {
            blocks.push(BlockRecord {
                position: primary.offset(1, 0, 0),
                chest_id: chest.chest_id,
                role: ChestBlockRole::LeftChest,
            });
        }
    }
    (chests, blocks)
}

fn seed(store: &mut dyn DataStore, chests: &[ChestRecord], blocks: &[BlockRecord]) {
    store.initialize().expect("initialize source");
    for chest in chests {
        store.put_chest_record(chest).expect("seed chest");
    }
    for block in blocks {
        store.put_block_record(block).expect("seed block");
    }
    store.sync().expect("sync source");
    store.close().expect("close source");
}

fn counts(dir: &Path, store_type: StoreType) -> (usize, usize) {
    let mut store = StoreFactory::new(dir).create(store_type);
    store.initialize().expect("initialize");
    let counts = (
        store.get_all_chest_records().expect("chests").len(),
        store.get_all_block_records().expect("blocks").len(),
    );
    store.close().expect("close");
    counts
}

#[test]
fn legacy_json_moves_into_fresh_sqlite_and_is_deleted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (chests, blocks) = legacy_records();
    assert_eq!(blocks.len(), 12);
    seed(&mut JsonDataStore::new(dir.path()), &chests, &blocks);

    let mut opened = StoreFactory::new(dir.path()).open(StoreType::Sqlite);

    assert!(!opened.is_fallback());
    assert_eq!(opened.migrations.len(), 1);
    let report = opened.migrations[0];
    assert_eq!((report.source, report.target), (StoreType::Json, StoreType::Sqlite));
    assert_eq!((report.chests, report.blocks, report.skipped_blocks), (5, 12, 0));

    assert_eq!(opened.store.get_all_chest_records().expect("chests").len(), 5);
    assert_eq!(opened.store.get_all_block_records().expect("blocks").len(), 12);
    assert!(!dir.path().join("deathchests.json").exists());
    opened.store.close().expect("close");
}

#[test]
fn sqlite_moves_into_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (chests, blocks) = legacy_records();
    seed(&mut SqliteDataStore::new(dir.path()), &chests, &blocks);

    let opened = StoreFactory::new(dir.path()).open(StoreType::Json);
    assert_eq!(opened.migrations.len(), 1);
    drop(opened);

    assert_eq!(counts(dir.path(), StoreType::Json), (5, 12));
    assert!(!dir.path().join("deathchests.db").exists());
}

#[test]
fn orphan_blocks_are_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (chests, mut blocks) = legacy_records();
    blocks.push(BlockRecord {
        position: BlockPosition::new(WorldId::random(), 100, 64, 100),
        chest_id: ChestId::random(),
        role: ChestBlockRole::RightChest,
    });
    seed(&mut JsonDataStore::new(dir.path()), &chests, &blocks);

    let opened = StoreFactory::new(dir.path()).open(StoreType::Sqlite);
    let report = opened.migrations[0];
    assert_eq!(report.blocks, 12);
    assert_eq!(report.skipped_blocks, 1);
}

#[test]
fn unreadable_legacy_file_is_left_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let legacy = dir.path().join("deathchests.json");
    fs::write(&legacy, "{\"chests\": [oops").expect("write");

    let opened = StoreFactory::new(dir.path()).open(StoreType::Sqlite);

    assert!(!opened.is_fallback());
    assert!(opened.migrations.is_empty());
    assert!(legacy.exists());
    assert_eq!(
        fs::read_to_string(&legacy).expect("legacy still readable"),
        "{\"chests\": [oops"
    );
}

#[test]
fn reopening_without_artifacts_migrates_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let factory = StoreFactory::new(dir.path());
    let mut first = factory.open(StoreType::Sqlite);
    first.store.close().expect("close");

    let second = factory.open(StoreType::Sqlite);
    assert!(second.migrations.is_empty());
}
