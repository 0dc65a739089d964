//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mutation::{MutationId, Payload};

/// A unique identifier for a detected conflict, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Create a new unique conflict ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which side wins when a conflict is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Push the stored local snapshot to the remote store
    UseLocal,
    /// Keep the remote copy and drop the local change
    UseServer,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UseLocal => "use_local",
            Self::UseServer => "use_server",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "use_local" | "local" => Ok(Self::UseLocal),
            "use_server" | "server" => Ok(Self::UseServer),
            other => Err(format!("unknown resolution strategy '{other}'")),
        }
    }
}

/// Record that diverged remotely while a local change was queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Conflict identifier
    pub id: ConflictId,
    /// Mutation that was held back by this conflict
    pub mutation_id: MutationId,
    /// Logical collection name
    pub table: String,
    /// Id of the diverged record
    pub record_id: String,
    /// Local payload at detection time
    pub local_snapshot: Payload,
    /// Remote payload at detection time
    pub server_snapshot: Payload,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
    /// Strategy used to resolve
    pub resolution_strategy: Option<ResolutionStrategy>,
}

impl ConflictRecord {
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_accepts_short_names() {
        assert_eq!(
            "local".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::UseLocal
        );
        assert_eq!(
            "USE_SERVER".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::UseServer
        );
        assert!("merge".parse::<ResolutionStrategy>().is_err());
    }

    #[test]
    fn conflict_id_parse() {
        let id = ConflictId::new();
        assert_eq!(id.as_str().parse::<ConflictId>().unwrap(), id);
    }
}
