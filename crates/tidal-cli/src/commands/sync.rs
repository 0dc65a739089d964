use tidal_core::{SyncResult, SyncService};

use crate::error::CliError;

pub async fn run_sync(service: &SyncService, as_json: bool) -> Result<SyncResult, CliError> {
    if !service.network().is_online() {
        return Err(CliError::Offline(service.pending_count().await?));
    }

    let result = service.trigger_sync().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(result);
    }

    println!("Sync completed: {result}");
    for error in &result.errors {
        println!("  {error}");
    }
    let remaining = service.pending_count().await?;
    if remaining > 0 {
        println!("{remaining} mutation(s) still pending");
    }
    Ok(result)
}
