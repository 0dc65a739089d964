//! Service-layer helpers shared by multiple clients.

mod sync_service;

pub use sync_service::SyncService;
