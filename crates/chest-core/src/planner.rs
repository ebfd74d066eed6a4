//! Assembly planner: picks the world positions a new chest will occupy.
//!
//! Candidates are visited nearest-first around the death location. A site
//! needs a replaceable block on solid ground for the primary container, the
//! same for a secondary container one block east when the drops need double
//! capacity, and a free block above the primary container for the sign.

use contracts::{BlockPosition, ChestBlockRole, PlayerId};

use crate::error::{ChestError, ChestResult};
use crate::platform::WorldPlatform;
use crate::registry::ChestRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementPlan {
    pub primary: BlockPosition,
    pub secondary: Option<BlockPosition>,
    pub sign: Option<BlockPosition>,
}

impl PlacementPlan {
    pub fn is_double(&self) -> bool {
        self.secondary.is_some()
    }

    /// Role/position pairs in priority order, ready for registration.
    pub fn blocks(&self) -> Vec<(ChestBlockRole, BlockPosition)> {
        let mut blocks = vec![(ChestBlockRole::RightChest, self.primary)];
        if let Some(secondary) = self.secondary {
            blocks.push((ChestBlockRole::LeftChest, secondary));
        }
        if let Some(sign) = self.sign {
            blocks.push((ChestBlockRole::Sign, sign));
        }
        blocks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyPlanner {
    search_radius: u32,
    place_sign: bool,
}

impl AssemblyPlanner {
    pub fn new(search_radius: u32, place_sign: bool) -> Self {
        Self {
            search_radius,
            place_sign,
        }
    }

    /// Choose a site near `origin`.
    ///
    /// When `needs_double` is set the nearest double site wins; if none
    /// exists the nearest single site is returned instead.
    pub fn plan<W: WorldPlatform + ?Sized>(
        &self,
        world: &W,
        registry: &ChestRegistry,
        player_id: PlayerId,
        origin: &BlockPosition,
        needs_double: bool,
    ) -> ChestResult<PlacementPlan> {
        let mut fallback = None;

        for candidate in self.search_order(origin) {
            if !Self::can_host_container(world, registry, player_id, &candidate) {
                continue;
            }

            let sign = if self.place_sign {
                let above = candidate.above();
                if !Self::is_free(world, registry, player_id, &above) {
                    continue;
                }
                Some(above)
            } else {
                None
            };

            let single = PlacementPlan {
                primary: candidate,
                secondary: None,
                sign,
            };
            if !needs_double {
                return Ok(single);
            }

            let secondary = candidate.offset(1, 0, 0);
            if Self::can_host_container(world, registry, player_id, &secondary) {
                return Ok(PlacementPlan {
                    secondary: Some(secondary),
                    ..single
                });
            }
            fallback.get_or_insert(single);
        }

        fallback.ok_or(ChestError::NoValidLocation {
            origin: *origin,
            radius: self.search_radius,
        })
    }

    /// Every position within the search radius, nearest first. Ties prefer
    /// the origin's own level, then lower y, then x, then z.
    pub fn search_order(&self, origin: &BlockPosition) -> Vec<BlockPosition> {
        let radius = self.search_radius as i32;
        let limit = i64::from(radius) * i64::from(radius);
        let mut offsets = Vec::new();

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                for dz in -radius..=radius {
                    let distance = i64::from(dx * dx + dy * dy + dz * dz);
                    if distance <= limit {
                        offsets.push((distance, dy.abs(), dy, dx, dz));
                    }
                }
            }
        }
        offsets.sort_unstable();

        offsets
            .into_iter()
            .map(|(_, _, dy, dx, dz)| origin.offset(dx, dy, dz))
            .collect()
    }

    fn is_free<W: WorldPlatform + ?Sized>(
        world: &W,
        registry: &ChestRegistry,
        player_id: PlayerId,
        position: &BlockPosition,
    ) -> bool {
        world.block_kind(position).is_replaceable()
            && !registry.is_claimed(position)
            && world.can_build(player_id, position)
    }

    fn can_host_container<W: WorldPlatform + ?Sized>(
        world: &W,
        registry: &ChestRegistry,
        player_id: PlayerId,
        position: &BlockPosition,
    ) -> bool {
        Self::is_free(world, registry, player_id, position)
            && world.block_kind(&position.below()).is_solid()
    }
}
