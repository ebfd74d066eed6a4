//! The host world as seen by the chest engine.
//!
//! Everything is addressed by stable `BlockPosition` / `PlayerId` keys. The
//! engine never holds on to host objects between calls; the host may change
//! any block between two calls and the engine re-checks what it needs.

use contracts::{BlockKind, BlockPosition, ItemStack, PlayerId};

pub trait WorldPlatform {
    /// Wall-clock time in milliseconds since epoch.
    fn now_millis(&self) -> u64;

    fn block_kind(&self, position: &BlockPosition) -> BlockKind;

    fn set_block(&mut self, position: &BlockPosition, kind: BlockKind);

    /// Stacks held by the container at `position`; empty when there is no container.
    fn container_contents(&self, position: &BlockPosition) -> Vec<ItemStack>;

    /// Remove and return every stack in the container at `position`.
    fn take_container_contents(&mut self, position: &BlockPosition) -> Vec<ItemStack>;

    /// Insert stacks into the container at `position`, returning what did not fit.
    fn add_to_container(
        &mut self,
        position: &BlockPosition,
        stacks: Vec<ItemStack>,
    ) -> Vec<ItemStack>;

    /// Number of players with the container's inventory open.
    fn container_viewers(&self, position: &BlockPosition) -> usize;

    fn drop_item(&mut self, position: &BlockPosition, stack: ItemStack);

    fn is_player_online(&self, player_id: PlayerId) -> bool;

    fn player_location(&self, player_id: PlayerId) -> Option<BlockPosition>;

    /// Insert stacks into the player's inventory, returning what did not fit.
    fn give_to_player(&mut self, player_id: PlayerId, stacks: Vec<ItemStack>) -> Vec<ItemStack>;

    /// Protection check delegated to the host (claims, regions, spawn protection).
    fn can_build(&self, player_id: PlayerId, position: &BlockPosition) -> bool;
}
