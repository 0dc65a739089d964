//! `tidal` - command-line access to the offline mutation outbox.

mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::{CommandFactory, Parser};
use tidal_core::{ResolutionStrategy, SyncService};

use crate::cli::{Cli, Commands};
use crate::commands::common::{
    open_local_service, open_remote_service, parse_conflict_id, parse_mutation_id, CliContext,
};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::enqueue::run_enqueue;
use crate::commands::outbox::{run_discard, run_failed, run_pending, run_purge, run_requeue};
use crate::commands::quota::run_quota;
use crate::commands::sync::run_sync;
use crate::config_profiles::default_cache_dir;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let default_directive: tracing_subscriber::filter::Directive = "tidal=info"
        .parse()
        .map_err(|error| CliError::Config(format!("Invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_directive),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();
    let context = || CliContext::resolve(cli.db_path.clone(), profile);

    match cli.command {
        Some(Commands::Enqueue {
            operation,
            table,
            payload,
        }) => {
            let service = open_local_service(&context()?).await?;
            run_enqueue(&service, operation.into(), &table, &payload).await?;
        }
        Some(Commands::Sync { json }) => {
            let service = open_remote_service(&context()?).await?;
            run_sync(&service, json).await?;
        }
        Some(Commands::Pending { json }) => {
            let service = open_local_service(&context()?).await?;
            run_pending(&service, json).await?;
        }
        Some(Commands::Failed { limit, json }) => {
            let service = open_local_service(&context()?).await?;
            run_failed(&service, limit, json).await?;
        }
        Some(Commands::Discard { id }) => {
            let id = parse_mutation_id(&id)?;
            let service = open_local_service(&context()?).await?;
            run_discard(&service, &id).await?;
        }
        Some(Commands::Requeue { id }) => {
            let id = parse_mutation_id(&id)?;
            let service = open_local_service(&context()?).await?;
            run_requeue(&service, &id).await?;
        }
        Some(Commands::Conflicts {
            resolved,
            limit,
            json,
        }) => {
            let service = open_local_service(&context()?).await?;
            run_conflicts(&service, resolved, limit, json).await?;
        }
        Some(Commands::Resolve { id, strategy }) => {
            let id = parse_conflict_id(&id)?;
            let strategy = ResolutionStrategy::from(strategy);
            let service = open_resolve_service(&context()?, strategy).await?;
            run_resolve(&service, &id, strategy).await?;
        }
        Some(Commands::Purge { older_than_days }) => {
            let service = open_local_service(&context()?).await?;
            run_purge(&service, older_than_days).await?;
        }
        Some(Commands::Quota { json }) => {
            let context = context()?;
            let cache_dir = context
                .config
                .cache
                .dir
                .clone()
                .unwrap_or_else(default_cache_dir);
            let service = open_local_service(&context).await?;
            run_quota(&service, &cache_dir, json).await?;
        }
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        Some(Commands::Config { command }) => run_config(command, profile, cli.db_path.clone())?,
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}

/// Keeping the local copy pushes it to the remote, so that path needs a
/// reachable backend. Keeping the server copy only touches the outbox.
async fn open_resolve_service(
    context: &CliContext,
    strategy: ResolutionStrategy,
) -> Result<SyncService, CliError> {
    if strategy == ResolutionStrategy::UseServer {
        return open_local_service(context).await;
    }

    let service = open_remote_service(context).await?;
    if !service.network().is_online() {
        return Err(CliError::Offline(service.pending_count().await?));
    }
    Ok(service)
}
