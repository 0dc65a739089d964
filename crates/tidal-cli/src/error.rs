use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tidal_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Payload must be a JSON object: {0}")]
    InvalidPayload(String),
    #[error("Invalid {kind} ID: {value}")]
    InvalidId { kind: &'static str, value: String },
    #[error("Table name cannot be empty")]
    EmptyTable,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Remote is unreachable; {0} mutation(s) left pending")]
    Offline(usize),
    #[error(
        "Sync is not configured. Run `tidal config init --remote-url <URL> --anon-key <KEY>`, or set TIDAL_REMOTE_URL and TIDAL_ANON_KEY."
    )]
    SyncNotConfigured,
}
