use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chest_core::store::{DataStore, StoreError, StoreResult};
use contracts::{
    BlockPosition, BlockRecord, ChestBlockRole, ChestId, ChestRecord, PlayerId, StoreType, WorldId,
};
use rusqlite::{params, Connection, Row};

const STORE: StoreType = StoreType::Sqlite;

fn sqlite_error(err: rusqlite::Error) -> StoreError {
    StoreError::backend(STORE, err)
}

/// Default backend: one SQLite file with a chest table and a block table.
#[derive(Debug)]
pub struct SqliteDataStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteDataStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::at_path(data_dir.as_ref().join(STORE.file_name().unwrap_or("deathchests.db")))
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> StoreResult<&Connection> {
        self.conn.as_ref().ok_or(StoreError::NotInitialized(STORE))
    }

    fn sidecar_paths(&self) -> [PathBuf; 2] {
        let base = self.path.as_os_str().to_owned();
        let mut wal = base.clone();
        wal.push("-wal");
        let mut shm = base;
        shm.push("-shm");
        [PathBuf::from(wal), PathBuf::from(shm)]
    }

    fn configure(conn: &Connection) -> rusqlite::Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chests (
                chest_id TEXT PRIMARY KEY,
                owner_id TEXT,
                killer_id TEXT,
                item_count INTEGER NOT NULL,
                placement_time INTEGER NOT NULL,
                expiration_time INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blocks (
                world_id TEXT NOT NULL,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                z INTEGER NOT NULL,
                chest_id TEXT NOT NULL REFERENCES chests(chest_id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                PRIMARY KEY (world_id, x, y, z)
            );

            CREATE INDEX IF NOT EXISTS idx_blocks_chest ON blocks(chest_id);
            ",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name)
             VALUES(1, 'initial_v1')",
            [],
        )?;

        Ok(())
    }
}

impl DataStore for SqliteDataStore {
    fn store_type(&self) -> StoreType {
        STORE
    }

    fn initialize(&mut self) -> StoreResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&self.path).map_err(sqlite_error)?;
        Self::configure(&conn).map_err(sqlite_error)?;
        Self::migrate(&conn).map_err(sqlite_error)?;
        log::debug!("[DataStore] opened {}", self.path.display());
        self.conn = Some(conn);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.conn.is_some()
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn put_chest_record(&mut self, record: &ChestRecord) -> StoreResult<()> {
        upsert_chest(self.conn()?, record)
    }

    fn put_block_record(&mut self, record: &BlockRecord) -> StoreResult<()> {
        upsert_block(self.conn()?, record)
    }

    /// One transaction for the whole batch; an error drops it uncommitted.
    fn put_records(&mut self, chests: &[ChestRecord], blocks: &[BlockRecord]) -> StoreResult<()> {
        let conn = self.conn.as_mut().ok_or(StoreError::NotInitialized(STORE))?;
        let tx = conn.transaction().map_err(sqlite_error)?;
        for chest in chests {
            upsert_chest(&tx, chest)?;
        }
        for block in blocks {
            upsert_block(&tx, block)?;
        }
        tx.commit().map_err(sqlite_error)
    }

    fn delete_chest_record(&mut self, chest_id: ChestId) -> StoreResult<()> {
        self.conn()?
            .execute(
                "DELETE FROM chests WHERE chest_id = ?1",
                params![chest_id.to_string()],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    fn delete_block_record(&mut self, position: &BlockPosition) -> StoreResult<()> {
        self.conn()?
            .execute(
                "DELETE FROM blocks WHERE world_id = ?1 AND x = ?2 AND y = ?3 AND z = ?4",
                params![
                    position.world_id.to_string(),
                    position.x,
                    position.y,
                    position.z
                ],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    fn get_all_chest_records(&self) -> StoreResult<Vec<ChestRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT chest_id, owner_id, killer_id, item_count, placement_time, expiration_time
                 FROM chests
                 ORDER BY placement_time ASC, chest_id ASC",
            )
            .map_err(sqlite_error)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawChestRow {
                    chest_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    killer_id: row.get(2)?,
                    item_count: row.get(3)?,
                    placement_time: row.get(4)?,
                    expiration_time: row.get(5)?,
                })
            })
            .map_err(sqlite_error)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(sqlite_error)?.into_record()?);
        }
        Ok(records)
    }

    fn get_all_block_records(&self) -> StoreResult<Vec<BlockRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT world_id, x, y, z, chest_id, role
                 FROM blocks
                 ORDER BY chest_id ASC, role ASC",
            )
            .map_err(sqlite_error)?;

        let rows = stmt
            .query_map([], raw_block_row)
            .map_err(sqlite_error)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(sqlite_error)?.into_record()?);
        }
        Ok(records)
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.conn()?
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(sqlite_error)
    }

    fn close(&mut self) -> StoreResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, err)| sqlite_error(err))
    }

    fn delete(&mut self) -> StoreResult<()> {
        self.close()?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        for sidecar in self.sidecar_paths() {
            if sidecar.exists() {
                fs::remove_file(sidecar)?;
            }
        }
        log::info!("[DataStore] deleted {}", self.path.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Upserts
// ---------------------------------------------------------------------------

fn upsert_chest(conn: &Connection, record: &ChestRecord) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO chests (
            chest_id,
            owner_id,
            killer_id,
            item_count,
            placement_time,
            expiration_time
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(chest_id) DO UPDATE SET
            owner_id = excluded.owner_id,
            killer_id = excluded.killer_id,
            item_count = excluded.item_count,
            placement_time = excluded.placement_time,
            expiration_time = excluded.expiration_time",
        params![
            record.chest_id.to_string(),
            record.owner_id.map(|id| id.to_string()),
            record.killer_id.map(|id| id.to_string()),
            i64::from(record.item_count),
            i64::try_from(record.placement_time).unwrap_or(i64::MAX),
            i64::try_from(record.expiration_time).unwrap_or(i64::MAX),
        ],
    )
    .map_err(sqlite_error)?;
    Ok(())
}

fn upsert_block(conn: &Connection, record: &BlockRecord) -> StoreResult<()> {
    let position = &record.position;
    conn.execute(
        "INSERT INTO blocks (world_id, x, y, z, chest_id, role)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(world_id, x, y, z) DO UPDATE SET
            chest_id = excluded.chest_id,
            role = excluded.role",
        params![
            position.world_id.to_string(),
            position.x,
            position.y,
            position.z,
            record.chest_id.to_string(),
            record.role.as_str(),
        ],
    )
    .map_err(sqlite_error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

struct RawChestRow {
    chest_id: String,
    owner_id: Option<String>,
    killer_id: Option<String>,
    item_count: i64,
    placement_time: i64,
    expiration_time: i64,
}

impl RawChestRow {
    fn into_record(self) -> StoreResult<ChestRecord> {
        Ok(ChestRecord {
            chest_id: parse_id::<ChestId>(&self.chest_id)?,
            owner_id: self.owner_id.as_deref().map(parse_id::<PlayerId>).transpose()?,
            killer_id: self.killer_id.as_deref().map(parse_id::<PlayerId>).transpose()?,
            item_count: u32::try_from(self.item_count).unwrap_or(0),
            placement_time: u64::try_from(self.placement_time).unwrap_or(0),
            expiration_time: u64::try_from(self.expiration_time).unwrap_or(0),
        })
    }
}

struct RawBlockRow {
    world_id: String,
    x: i32,
    y: i32,
    z: i32,
    chest_id: String,
    role: String,
}

fn raw_block_row(row: &Row<'_>) -> rusqlite::Result<RawBlockRow> {
    Ok(RawBlockRow {
        world_id: row.get(0)?,
        x: row.get(1)?,
        y: row.get(2)?,
        z: row.get(3)?,
        chest_id: row.get(4)?,
        role: row.get(5)?,
    })
}

impl RawBlockRow {
    fn into_record(self) -> StoreResult<BlockRecord> {
        let world_id: WorldId = parse_id(&self.world_id)?;
        let role = ChestBlockRole::parse(&self.role)
            .ok_or_else(|| StoreError::corrupt(STORE, format!("unknown block role '{}'", self.role)))?;
        Ok(BlockRecord {
            position: BlockPosition::new(world_id, self.x, self.y, self.z),
            chest_id: parse_id(&self.chest_id)?,
            role,
        })
    }
}

fn parse_id<T>(raw: &str) -> StoreResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| StoreError::corrupt(STORE, format!("bad identifier '{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chest(expiration_time: u64) -> ChestRecord {
        ChestRecord {
            chest_id: ChestId::random(),
            owner_id: Some(PlayerId::random()),
            killer_id: None,
            item_count: 3,
            placement_time: 1_000,
            expiration_time,
        }
    }

    fn open(dir: &Path) -> SqliteDataStore {
        let mut store = SqliteDataStore::new(dir);
        store.initialize().expect("initialize sqlite");
        store
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = chest(90_000);
        let block = BlockRecord {
            position: BlockPosition::new(WorldId::random(), -12, 70, 400),
            chest_id: record.chest_id,
            role: ChestBlockRole::LeftChest,
        };

        let mut store = open(dir.path());
        store.put_chest_record(&record).expect("put chest");
        store.put_block_record(&block).expect("put block");
        store.sync().expect("sync");
        store.close().expect("close");

        let reopened = open(dir.path());
        assert_eq!(reopened.get_all_chest_records().expect("chests"), vec![record]);
        assert_eq!(reopened.get_all_block_records().expect("blocks"), vec![block]);
    }

    #[test]
    fn deleting_a_chest_cascades_to_its_blocks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        let record = chest(0);
        let world_id = WorldId::random();
        let block = BlockRecord {
            position: BlockPosition::new(world_id, 0, 64, 0),
            chest_id: record.chest_id,
            role: ChestBlockRole::RightChest,
        };
        // Blocks reference an existing chest row.
        assert!(store.put_block_record(&block).is_err());

        store.put_chest_record(&record).expect("put chest");
        store.put_block_record(&block).expect("put block");

        store.delete_chest_record(record.chest_id).expect("delete");
        assert!(store.get_all_chest_records().expect("chests").is_empty());
        assert!(store.get_all_block_records().expect("blocks").is_empty());
    }

    #[test]
    fn upsert_replaces_existing_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        let mut record = chest(5_000);
        store.put_chest_record(&record).expect("insert");
        record.item_count = 9;
        store.put_chest_record(&record).expect("update");

        let stored = store.get_all_chest_records().expect("chests");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].item_count, 9);
    }

    #[test]
    fn delete_removes_the_database_and_sidecars() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        store.put_chest_record(&chest(0)).expect("put chest");
        assert!(store.exists());

        store.delete().expect("delete");
        assert!(!store.exists());
        assert!(!store.is_initialized());
        assert!(store.sidecar_paths().iter().all(|path| !path.exists()));
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        let chests = vec![chest(0), chest(0)];
        let world_id = WorldId::random();
        let blocks = vec![
            BlockRecord {
                position: BlockPosition::new(world_id, 0, 64, 0),
                chest_id: chests[0].chest_id,
                role: ChestBlockRole::RightChest,
            },
            // No chest row to reference.
            BlockRecord {
                position: BlockPosition::new(world_id, 4, 64, 0),
                chest_id: ChestId::random(),
                role: ChestBlockRole::RightChest,
            },
        ];

        assert!(store.put_records(&chests, &blocks).is_err());
        assert!(store.get_all_chest_records().expect("chests").is_empty());
        assert!(store.get_all_block_records().expect("blocks").is_empty());

        store.put_records(&chests, &blocks[..1]).expect("valid batch");
        assert_eq!(store.get_all_chest_records().expect("chests").len(), 2);
        assert_eq!(store.get_all_block_records().expect("blocks").len(), 1);
    }

    #[test]
    fn operations_before_initialize_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = SqliteDataStore::new(dir.path());
        assert!(matches!(
            store.put_chest_record(&chest(0)),
            Err(StoreError::NotInitialized(StoreType::Sqlite))
        ));
        assert!(!store.exists());
    }
}
