use tidal_core::{ConflictId, ConflictRecord, ResolutionStrategy, SyncService};

use crate::commands::common::{conflict_to_item, format_conflict_lines, ConflictItem};
use crate::error::CliError;

pub async fn run_conflicts(
    service: &SyncService,
    resolved: bool,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = if resolved {
        service.list_resolved_conflicts(limit).await?
    } else {
        service.list_conflicts().await?
    };

    if as_json {
        let items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        if resolved {
            println!("No resolved conflicts recorded.");
        } else {
            println!("No open conflicts.");
        }
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_resolve(
    service: &SyncService,
    id: &ConflictId,
    strategy: ResolutionStrategy,
) -> Result<ConflictRecord, CliError> {
    let resolved = service.resolve_conflict(id, strategy).await?;
    println!(
        "Resolved {}/{} with {strategy}",
        resolved.table, resolved.record_id
    );

    let remaining = service.pending_count().await?;
    if remaining > 0 {
        println!("{remaining} mutation(s) still pending");
    }
    Ok(resolved)
}
