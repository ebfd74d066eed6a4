use contracts::{BlockPosition, ChestId, StoreType};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ChestError {
    #[error("position {position} is already claimed by chest {claimed_by}")]
    Conflict {
        position: BlockPosition,
        claimed_by: ChestId,
    },

    #[error("chest {0} is already registered")]
    AlreadyRegistered(ChestId),

    #[error("invalid chest assembly: {0}")]
    InvalidAssembly(String),

    #[error("no valid chest location within {radius} blocks of {origin}")]
    NoValidLocation { origin: BlockPosition, radius: u32 },

    #[error("could not initialize {store} datastore: {source}")]
    StoreInit {
        store: StoreType,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ChestResult<T> = std::result::Result<T, ChestError>;
