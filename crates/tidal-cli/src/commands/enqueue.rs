use tidal_core::{MutationId, MutationOperation, SyncService};

use crate::commands::common::{normalize_table, parse_payload};
use crate::error::CliError;

pub async fn run_enqueue(
    service: &SyncService,
    operation: MutationOperation,
    table: &str,
    raw_payload: &str,
) -> Result<MutationId, CliError> {
    let table = normalize_table(table)?;
    let payload = parse_payload(raw_payload)?;

    let id = service.enqueue_mutation(operation, &table, payload).await?;
    println!("Queued {operation} on {table}: {id}");
    Ok(id)
}
