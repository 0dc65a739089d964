//! Mutation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::taxonomy::ClassifiedError;

/// Field set of a record at the time of a mutation.
pub type Payload = Map<String, Value>;

/// Field that carries the record id inside a payload.
pub const ID_FIELD: &str = "id";

/// Field that carries the client-side modification time inside a payload.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// A unique identifier for a queued mutation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Create a new unique mutation ID using UUID v7
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

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of write a mutation performs against the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    Insert,
    Update,
    Delete,
}

impl MutationOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown mutation operation '{other}'")),
        }
    }
}

/// Sync status of a queued mutation
///
/// `Synced` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Synced,
    Failed,
    ConflictPending,
}

impl MutationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::ConflictPending => "conflict_pending",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Failed)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "conflict_pending" => Ok(Self::ConflictPending),
            other => Err(format!("unknown mutation status '{other}'")),
        }
    }
}

/// A single insert/update/delete queued for synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Unique identifier
    pub id: MutationId,
    /// Write kind
    pub operation: MutationOperation,
    /// Logical collection the mutation targets
    pub table: String,
    /// Id of the targeted record, taken from the payload
    pub record_id: String,
    /// Record fields at mutation time
    pub payload: Payload,
    /// Current sync status
    pub status: MutationStatus,
    /// Number of sync attempts made
    pub attempt_count: u32,
    /// Last classified error, if any
    pub last_error: Option<ClassifiedError>,
    /// Enqueue order key (Unix ms, strictly increasing)
    pub created_at: i64,
    /// Last status change (Unix ms)
    pub updated_at: i64,
    /// Earliest time the next attempt may run (Unix ms)
    pub next_attempt_at: i64,
    /// When the mutation reached `Synced` (Unix ms)
    pub synced_at: Option<i64>,
}

impl MutationRecord {
    /// `(table, record_id)` pair used to keep per-record ordering
    pub fn target_key(&self) -> (&str, &str) {
        (&self.table, &self.record_id)
    }

    /// Whether the engine may attempt this mutation at `now_ms`
    pub const fn is_due(&self, now_ms: i64) -> bool {
        matches!(self.status, MutationStatus::Pending) && self.next_attempt_at <= now_ms
    }
}

/// Extract the record id from a payload.
///
/// String ids are trimmed; integer ids are rendered in decimal.
pub fn record_id_from_payload(payload: &Payload) -> Option<String> {
    match payload.get(ID_FIELD)? {
        Value::String(id) => {
            let id = id.trim();
            (!id.is_empty()).then(|| id.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_mutation_id_unique() {
        let id1 = MutationId::new();
        let id2 = MutationId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_mutation_id_parse() {
        let id = MutationId::new();
        let parsed: MutationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_status_strings() {
        for status in [
            MutationStatus::Pending,
            MutationStatus::Synced,
            MutationStatus::Failed,
            MutationStatus::ConflictPending,
        ] {
            assert_eq!(status.as_str().parse::<MutationStatus>().unwrap(), status);
        }
        assert!(MutationStatus::Synced.is_terminal());
        assert!(MutationStatus::Failed.is_terminal());
        assert!(!MutationStatus::ConflictPending.is_terminal());
    }

    #[test]
    fn test_operation_parse_is_case_insensitive() {
        assert_eq!(
            " Update ".parse::<MutationOperation>().unwrap(),
            MutationOperation::Update
        );
        assert!("upsert".parse::<MutationOperation>().is_err());
    }

    #[test]
    fn test_record_id_from_payload() {
        assert_eq!(
            record_id_from_payload(&payload(json!({"id": " r-1 "}))),
            Some("r-1".to_string())
        );
        assert_eq!(
            record_id_from_payload(&payload(json!({"id": 42}))),
            Some("42".to_string())
        );
        assert_eq!(record_id_from_payload(&payload(json!({"id": ""}))), None);
        assert_eq!(record_id_from_payload(&payload(json!({"name": "x"}))), None);
    }
}
