mod entity_store;
mod registry;
mod world;

pub use entity_store::{BodyParams, EntityKind, EntityStore, MAX_ENTITIES, Slot};
pub use registry::{EntityRegistry, Handle, MAX_ID_LEN};
pub use world::World;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("entity store is full ({capacity} slots)")]
    Full { capacity: usize },
    #[error("slot {slot} exceeds store capacity {capacity}")]
    SlotOutOfRange { slot: u32, capacity: usize },
    #[error("entity id must not be empty")]
    EmptyId,
    #[error("entity id {0:?} is already in use")]
    IdTaken(String),
    #[error("entity id is {len} bytes, limit is 255")]
    IdTooLong { len: usize },
}
