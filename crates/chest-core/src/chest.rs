//! The death chest entity: ownership, timestamps, and its expiration handle.

use contracts::{ChestId, ChestRecord, PlayerId, TICK_MILLIS};

use crate::scheduler::TaskHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathChest {
    chest_id: ChestId,
    owner_id: Option<PlayerId>,
    killer_id: Option<PlayerId>,
    item_count: u32,
    placement_time: u64,
    /// 0 means the chest never expires.
    expiration_time: u64,
    pub(crate) expire_task: Option<TaskHandle>,
}

impl DeathChest {
    /// A fresh chest placed at `now`. `expire_after_millis == 0` disables expiration.
    pub fn new(
        owner_id: Option<PlayerId>,
        killer_id: Option<PlayerId>,
        now: u64,
        expire_after_millis: u64,
    ) -> Self {
        let expiration_time = if expire_after_millis == 0 {
            0
        } else {
            now.saturating_add(expire_after_millis)
        };

        Self {
            chest_id: ChestId::random(),
            owner_id,
            killer_id,
            item_count: 0,
            placement_time: now,
            expiration_time,
            expire_task: None,
        }
    }

    pub fn from_record(record: &ChestRecord) -> Self {
        Self {
            chest_id: record.chest_id,
            owner_id: record.owner_id,
            killer_id: record.killer_id,
            item_count: record.item_count,
            placement_time: record.placement_time,
            expiration_time: record.expiration_time,
            expire_task: None,
        }
    }

    pub fn to_record(&self) -> ChestRecord {
        ChestRecord {
            chest_id: self.chest_id,
            owner_id: self.owner_id,
            killer_id: self.killer_id,
            item_count: self.item_count,
            placement_time: self.placement_time,
            expiration_time: self.expiration_time,
        }
    }

    pub fn chest_id(&self) -> ChestId {
        self.chest_id
    }

    pub fn owner_id(&self) -> Option<PlayerId> {
        self.owner_id
    }

    pub fn killer_id(&self) -> Option<PlayerId> {
        self.killer_id
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub(crate) fn set_item_count(&mut self, item_count: u32) {
        self.item_count = item_count;
    }

    pub fn placement_time(&self) -> u64 {
        self.placement_time
    }

    pub fn expiration_time(&self) -> u64 {
        self.expiration_time
    }

    pub fn expire_task(&self) -> Option<TaskHandle> {
        self.expire_task
    }

    pub fn expires(&self) -> bool {
        self.expiration_time > 0
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires() && self.expiration_time <= now
    }

    /// Ticks until expiration, rounded to the nearest tick and never below one.
    /// `None` for chests that never expire.
    pub fn ticks_until_expiration(&self, now: u64) -> Option<u64> {
        if !self.expires() {
            return None;
        }
        let remaining = self.expiration_time.saturating_sub(now);
        let ticks = (remaining + TICK_MILLIS / 2) / TICK_MILLIS;
        Some(ticks.max(1))
    }

    pub fn is_owner(&self, player_id: Option<PlayerId>) -> bool {
        matches!((self.owner_id, player_id), (Some(owner), Some(player)) if owner == player)
    }

    pub fn is_killer(&self, player_id: Option<PlayerId>) -> bool {
        matches!((self.killer_id, player_id), (Some(killer), Some(player)) if killer == player)
    }
}
