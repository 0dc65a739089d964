//! Network state model

use serde::{Deserialize, Serialize};

/// Best-effort estimate of link quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Slow,
    #[default]
    Medium,
    Fast,
}

/// Snapshot of connectivity. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkState {
    pub online: bool,
    pub connection_quality: ConnectionQuality,
}

impl NetworkState {
    pub const fn online(connection_quality: ConnectionQuality) -> Self {
        Self {
            online: true,
            connection_quality,
        }
    }

    pub const fn offline() -> Self {
        Self {
            online: false,
            connection_quality: ConnectionQuality::Slow,
        }
    }
}
