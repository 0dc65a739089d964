use std::env;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tidal_core::config::TidalConfig;
use tidal_core::network::{ConnectivityProbe, HttpConnectivityProbe, NetworkMonitor};
use tidal_core::remote::{MemoryRemoteStore, PostgrestRemoteStore, RemoteStore};
use tidal_core::{
    ConflictId, ConflictRecord, MutationId, MutationRecord, Payload, SyncService,
};

use crate::config_profiles::{default_db_path, CliProfilesConfig};
use crate::error::CliError;

const DB_PATH_ENV: &str = "TIDAL_DB_PATH";

/// Settings resolved from flags, the active profile and the environment.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub profile_name: String,
    pub db_path: PathBuf,
    pub config: TidalConfig,
}

impl CliContext {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        profile: Option<&str>,
    ) -> Result<Self, CliError> {
        let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = profiles.resolve_profile_name(profile);
        let config = profiles
            .profile(&profile_name)
            .cloned()
            .unwrap_or_default()
            .to_tidal_config(|key| env::var(key).ok());
        config.validate().map_err(CliError::Config)?;

        Ok(Self {
            profile_name,
            db_path: resolve_db_path(cli_db_path),
            config,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct MutationItem {
    pub id: String,
    pub operation: String,
    pub table: String,
    pub record_id: String,
    pub status: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub next_attempt_at: i64,
    pub payload: Payload,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: String,
    pub mutation_id: String,
    pub table: String,
    pub record_id: String,
    pub detected_at: i64,
    pub detected_at_iso: String,
    pub resolved_at: Option<i64>,
    pub strategy: Option<String>,
    pub local: Payload,
    pub server: Payload,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

/// Open the outbox for commands that never talk to the remote.
///
/// The remote is an unreachable stand-in and the network stays offline, so
/// follow-up passes are no-ops.
pub async fn open_local_service(context: &CliContext) -> Result<SyncService, CliError> {
    let remote = MemoryRemoteStore::new();
    remote.set_unreachable(true);
    Ok(SyncService::open_path(
        context.db_path.clone(),
        context.config.clone(),
        Arc::new(remote),
        NetworkMonitor::default(),
    )
    .await?)
}

/// Open the outbox against the configured backend, probing it once to seed
/// the network state.
pub async fn open_remote_service(context: &CliContext) -> Result<SyncService, CliError> {
    if !context.config.remote.is_configured() {
        return Err(CliError::SyncNotConfigured);
    }

    let remote: Arc<dyn RemoteStore> =
        Arc::new(PostgrestRemoteStore::new(&context.config.remote).map_err(CliError::Config)?);
    let base_url = context.config.remote.base_url().map_err(CliError::Config)?;
    let probe = HttpConnectivityProbe::new(format!("{base_url}/rest/v1/"))
        .map_err(|error| CliError::Config(format!("Failed to build HTTP client: {error}")))?;

    let network = NetworkMonitor::default();
    network.set_state(probe.check().await);
    tracing::debug!(
        "Remote {base_url} is {}",
        if network.is_online() { "reachable" } else { "unreachable" }
    );

    Ok(SyncService::open_path(
        context.db_path.clone(),
        context.config.clone(),
        remote,
        network,
    )
    .await?)
}

pub fn parse_mutation_id(value: &str) -> Result<MutationId, CliError> {
    value.trim().parse().map_err(|_| CliError::InvalidId {
        kind: "mutation",
        value: value.to_string(),
    })
}

pub fn parse_conflict_id(value: &str) -> Result<ConflictId, CliError> {
    value.trim().parse().map_err(|_| CliError::InvalidId {
        kind: "conflict",
        value: value.to_string(),
    })
}

pub fn parse_payload(raw: &str) -> Result<Payload, CliError> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(payload)) => Ok(payload),
        Ok(other) => Err(CliError::InvalidPayload(format!("got {other}"))),
        Err(error) => Err(CliError::InvalidPayload(error.to_string())),
    }
}

pub fn normalize_table(table: &str) -> Result<String, CliError> {
    let trimmed = table.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyTable)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn mutation_to_item(record: &MutationRecord) -> MutationItem {
    MutationItem {
        id: record.id.to_string(),
        operation: record.operation.to_string(),
        table: record.table.clone(),
        record_id: record.record_id.clone(),
        status: record.status.to_string(),
        attempt_count: record.attempt_count,
        last_error: record.last_error.as_ref().map(|error| error.message.clone()),
        created_at: record.created_at,
        next_attempt_at: record.next_attempt_at,
        payload: record.payload.clone(),
    }
}

pub fn conflict_to_item(conflict: &ConflictRecord) -> ConflictItem {
    ConflictItem {
        id: conflict.id.to_string(),
        mutation_id: conflict.mutation_id.to_string(),
        table: conflict.table.clone(),
        record_id: conflict.record_id.clone(),
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
        resolved_at: conflict.resolved_at,
        strategy: conflict
            .resolution_strategy
            .map(|strategy| strategy.to_string()),
        local: conflict.local_snapshot.clone(),
        server: conflict.server_snapshot.clone(),
    }
}

pub fn format_mutation_lines(records: &[MutationRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let target = format!("{}/{}", record.table, record.record_id);
            let relative_time = format_relative_time(record.created_at, now_ms);
            let mut line = format!(
                "{}  {:<6}  {:<30}  {:<16}  attempts={}  {relative_time}",
                record.id,
                record.operation.as_str(),
                target,
                record.status.as_str(),
                record.attempt_count
            );
            if let Some(error) = &record.last_error {
                let _ = write!(line, "  [{}] {}", error.category, error.message);
            }
            line
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let target = format!("{}/{}", conflict.table, conflict.record_id);
            match (conflict.resolved_at, conflict.resolution_strategy) {
                (Some(resolved_at), Some(strategy)) => format!(
                    "{}  {:<30}  resolved {} with {strategy}",
                    conflict.id,
                    target,
                    format_sync_timestamp(resolved_at)
                ),
                _ => format!(
                    "{}  {:<30}  detected {}",
                    conflict.id,
                    target,
                    format_sync_timestamp(conflict.detected_at)
                ),
            }
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Human-readable byte count, e.g. `1.5 MiB`.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
