//! Death chest engine: chest registry, expiration scheduling, placement and
//! the lifecycle that ties them to a host world and a data store.

pub mod chest;
pub mod error;
pub mod manager;
pub mod memory_world;
pub mod planner;
pub mod platform;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use chest::DeathChest;
pub use error::{ChestError, ChestResult};
pub use manager::{ChestManager, ChestSettings, DeployOutcome, LoadReport, LootOutcome};
pub use memory_world::MemoryWorld;
pub use planner::{AssemblyPlanner, PlacementPlan};
pub use platform::WorldPlatform;
pub use registry::ChestRegistry;
pub use scheduler::{ExpirationScheduler, ScheduledExpiry, TaskHandle};
pub use store::{DataStore, MemoryDataStore, StoreError, StoreResult};
