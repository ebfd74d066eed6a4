//! Legacy flat-file backend. The whole record set is rewritten on every
//! mutation through a temp file and a rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chest_core::store::{DataStore, StoreError, StoreResult};
use contracts::{BlockPosition, BlockRecord, ChestId, ChestRecord, StoreType, SCHEMA_VERSION_V1};
use serde::{Deserialize, Serialize};

const STORE: StoreType = StoreType::Json;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JsonStoreFile {
    schema_version: String,
    #[serde(default)]
    chests: Vec<ChestRecord>,
    #[serde(default)]
    blocks: Vec<BlockRecord>,
}

#[derive(Debug)]
pub struct JsonDataStore {
    path: PathBuf,
    chests: BTreeMap<ChestId, ChestRecord>,
    blocks: BTreeMap<BlockPosition, BlockRecord>,
    initialized: bool,
}

impl JsonDataStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::at_path(data_dir.as_ref().join(STORE.file_name().unwrap_or("deathchests.json")))
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chests: BTreeMap::new(),
            blocks: BTreeMap::new(),
            initialized: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut raw = self.path.as_os_str().to_owned();
        raw.push(".tmp");
        PathBuf::from(raw)
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(StoreError::NotInitialized(STORE))
        }
    }

    fn read_file(&self) -> StoreResult<JsonStoreFile> {
        let raw = fs::read_to_string(&self.path)?;
        let file: JsonStoreFile =
            serde_json::from_str(&raw).map_err(|err| StoreError::backend(STORE, err))?;
        if file.schema_version != SCHEMA_VERSION_V1 {
            log::warn!(
                "[DataStore] {} has schema version {}, reading as {SCHEMA_VERSION_V1}",
                self.path.display(),
                file.schema_version
            );
        }
        Ok(file)
    }

    fn write_through(&self) -> StoreResult<()> {
        let file = JsonStoreFile {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            chests: self.chests.values().cloned().collect(),
            blocks: self.blocks.values().copied().collect(),
        };
        let payload =
            serde_json::to_string_pretty(&file).map_err(|err| StoreError::backend(STORE, err))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        fs::write(&temp, payload)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl DataStore for JsonDataStore {
    fn store_type(&self) -> StoreType {
        STORE
    }

    fn initialize(&mut self) -> StoreResult<()> {
        if self.initialized {
            return Ok(());
        }
        if self.path.exists() {
            let file = self.read_file()?;
            self.chests = file
                .chests
                .into_iter()
                .map(|record| (record.chest_id, record))
                .collect();
            self.blocks = file
                .blocks
                .into_iter()
                .map(|record| (record.position, record))
                .collect();
        }
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn put_chest_record(&mut self, record: &ChestRecord) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.chests.insert(record.chest_id, record.clone());
        self.write_through()
    }

    fn put_block_record(&mut self, record: &BlockRecord) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.blocks.insert(record.position, *record);
        self.write_through()
    }

    /// Applies the batch in memory and writes the file once, restoring the
    /// previous record set when that write fails.
    fn put_records(&mut self, chests: &[ChestRecord], blocks: &[BlockRecord]) -> StoreResult<()> {
        self.ensure_initialized()?;
        let previous = (self.chests.clone(), self.blocks.clone());
        self.chests
            .extend(chests.iter().map(|record| (record.chest_id, record.clone())));
        self.blocks
            .extend(blocks.iter().map(|record| (record.position, *record)));

        let result = self.write_through();
        if result.is_err() {
            (self.chests, self.blocks) = previous;
        }
        result
    }

    fn delete_chest_record(&mut self, chest_id: ChestId) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.chests.remove(&chest_id);
        self.blocks.retain(|_, block| block.chest_id != chest_id);
        self.write_through()
    }

    fn delete_block_record(&mut self, position: &BlockPosition) -> StoreResult<()> {
        self.ensure_initialized()?;
        if self.blocks.remove(position).is_some() {
            self.write_through()?;
        }
        Ok(())
    }

    fn get_all_chest_records(&self) -> StoreResult<Vec<ChestRecord>> {
        self.ensure_initialized()?;
        Ok(self.chests.values().cloned().collect())
    }

    fn get_all_block_records(&self) -> StoreResult<Vec<BlockRecord>> {
        self.ensure_initialized()?;
        Ok(self.blocks.values().copied().collect())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.write_through()
    }

    fn close(&mut self) -> StoreResult<()> {
        self.initialized = false;
        self.chests.clear();
        self.blocks.clear();
        Ok(())
    }

    fn delete(&mut self) -> StoreResult<()> {
        self.close()?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
            log::info!("[DataStore] deleted {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ChestBlockRole, PlayerId, WorldId};

    fn record() -> ChestRecord {
        ChestRecord {
            chest_id: ChestId::random(),
            owner_id: Some(PlayerId::random()),
            killer_id: Some(PlayerId::random()),
            item_count: 12,
            placement_time: 42,
            expiration_time: 3_600_042,
        }
    }

    #[test]
    fn every_write_lands_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonDataStore::new(dir.path());
        store.initialize().expect("initialize");
        assert!(!store.exists());

        let chest = record();
        let block = BlockRecord {
            position: BlockPosition::new(WorldId::random(), 1, 2, 3),
            chest_id: chest.chest_id,
            role: ChestBlockRole::Sign,
        };
        store.put_chest_record(&chest).expect("chest");
        store.put_block_record(&block).expect("block");
        assert!(store.exists());
        assert!(!store.temp_path().exists());

        let mut reread = JsonDataStore::new(dir.path());
        reread.initialize().expect("reread");
        assert_eq!(reread.get_all_chest_records().expect("chests"), vec![chest]);
        assert_eq!(reread.get_all_block_records().expect("blocks"), vec![block]);
    }

    #[test]
    fn chest_delete_takes_its_blocks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonDataStore::new(dir.path());
        store.initialize().expect("initialize");
        let chest = record();
        store.put_chest_record(&chest).expect("chest");
        store
            .put_block_record(&BlockRecord {
                position: BlockPosition::new(WorldId::random(), 0, 0, 0),
                chest_id: chest.chest_id,
                role: ChestBlockRole::RightChest,
            })
            .expect("block");

        store.delete_chest_record(chest.chest_id).expect("delete");
        assert!(store.get_all_block_records().expect("blocks").is_empty());
    }

    #[test]
    fn failed_batch_write_keeps_the_previous_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonDataStore::new(dir.path());
        store.initialize().expect("initialize");
        let kept = record();
        store.put_chest_record(&kept).expect("chest");

        // A directory in the way of the temp file makes the write fail.
        fs::create_dir(store.temp_path()).expect("block temp path");
        assert!(store.put_records(&[record(), record()], &[]).is_err());
        assert_eq!(store.get_all_chest_records().expect("chests"), vec![kept]);

        fs::remove_dir(store.temp_path()).expect("unblock temp path");
        store.put_records(&[record()], &[]).expect("batch");
        let mut reread = JsonDataStore::new(dir.path());
        reread.initialize().expect("reread");
        assert_eq!(reread.get_all_chest_records().expect("chests").len(), 2);
    }

    #[test]
    fn garbage_file_fails_initialize() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("deathchests.json"), "{ not json").expect("write");
        let mut store = JsonDataStore::new(dir.path());
        assert!(store.initialize().is_err());
        assert!(!store.is_initialized());
    }
}
