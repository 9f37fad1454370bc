mod error;
mod ring;
mod semaphore;
mod shared_ring;
mod shm_layout;
mod slot;

pub use error::RingError;
pub use ring::{ReadyPoll, RingConfig};
pub use shared_ring::{Claim, OwnedRing, SharedRing};
