use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tidal_core::{MutationOperation, ResolutionStrategy};

#[derive(Parser)]
#[command(name = "tidal")]
#[command(about = "Inspect and drain the offline mutation outbox")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local outbox database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for remote configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a local write for synchronization
    Enqueue {
        /// Kind of write
        #[arg(value_enum)]
        operation: OperationArg,
        /// Remote table name
        table: String,
        /// Record as a JSON object (must contain an `id`)
        payload: String,
    },
    /// Drain the outbox against the configured remote
    Sync {
        /// Output the pass summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List mutations waiting to be sent
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List mutations that exhausted their attempts
    Failed {
        /// Number of mutations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a failed mutation
    Discard {
        /// Mutation ID
        id: String,
    },
    /// Queue a failed mutation again as a fresh pending entry
    Requeue {
        /// Mutation ID
        id: String,
    },
    /// List sync conflicts
    Conflicts {
        /// Show recently resolved conflicts instead of open ones
        #[arg(long)]
        resolved: bool,
        /// Number of resolved conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict by keeping the local or the server copy
    Resolve {
        /// Conflict ID
        id: String,
        /// Which copy wins
        #[arg(value_enum)]
        strategy: StrategyArg,
    },
    /// Delete synced mutations older than the given age
    Purge {
        /// Minimum age in days
        #[arg(long, value_name = "DAYS", default_value = "7")]
        older_than_days: u64,
    },
    /// Show asset cache usage
    Quota {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationArg {
    Insert,
    Update,
    Delete,
}

impl From<OperationArg> for MutationOperation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Insert => Self::Insert,
            OperationArg::Update => Self::Update,
            OperationArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    Local,
    Server,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Local => Self::UseLocal,
            StrategyArg::Server => Self::UseServer,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Hosted backend project URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Backend anon/public key
        #[arg(long, value_name = "KEY")]
        anon_key: Option<String>,
        /// User access token (falls back to the anon key)
        #[arg(long, value_name = "TOKEN")]
        access_token: Option<String>,
        /// Directory for cached assets
        #[arg(long, value_name = "PATH")]
        cache_dir: Option<PathBuf>,
        /// Asset cache quota in MiB
        #[arg(long, value_name = "MIB")]
        cache_quota_mb: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved configuration for a profile
    Show {
        /// Profile name to show
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}
