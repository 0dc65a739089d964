//! Data models for Tidal

mod asset;
mod conflict;
mod mutation;
mod network;

pub use asset::{CachedAsset, StorageQuota};
pub use conflict::{ConflictId, ConflictRecord, ResolutionStrategy};
pub use mutation::{
    record_id_from_payload, MutationId, MutationOperation, MutationRecord, MutationStatus,
    Payload, ID_FIELD, UPDATED_AT_FIELD,
};
pub use network::{ConnectionQuality, NetworkState};
