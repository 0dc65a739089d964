use std::time::Duration;

use tidal_core::{MutationId, MutationRecord, SyncService};

use crate::commands::common::{format_mutation_lines, mutation_to_item, MutationItem};
use crate::error::CliError;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

fn print_mutations(records: &[MutationRecord], as_json: bool, empty: &str) -> Result<(), CliError> {
    if as_json {
        let items = records
            .iter()
            .map(mutation_to_item)
            .collect::<Vec<MutationItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{empty}");
        return Ok(());
    }

    for line in format_mutation_lines(records) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_pending(service: &SyncService, as_json: bool) -> Result<(), CliError> {
    let records = service.list_pending().await?;
    print_mutations(&records, as_json, "Outbox is empty.")
}

pub async fn run_failed(service: &SyncService, limit: usize, as_json: bool) -> Result<(), CliError> {
    let records = service.list_failed(limit).await?;
    print_mutations(&records, as_json, "No failed mutations.")
}

pub async fn run_discard(service: &SyncService, id: &MutationId) -> Result<(), CliError> {
    service.discard_failed(id).await?;
    println!("Discarded {id}");
    Ok(())
}

pub async fn run_requeue(service: &SyncService, id: &MutationId) -> Result<MutationId, CliError> {
    let requeued = service.requeue_failed(id).await?;
    println!("Requeued {id} as {requeued}");
    Ok(requeued)
}

pub async fn run_purge(service: &SyncService, older_than_days: u64) -> Result<usize, CliError> {
    let age = Duration::from_secs(older_than_days.saturating_mul(SECONDS_PER_DAY));
    let purged = service.purge_synced(age).await?;
    println!("Purged {purged} synced mutation(s)");
    Ok(purged)
}
