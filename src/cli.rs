use clap::{Parser, Subcommand};
use clap_complete::Shell;
use reconcile::PackageManagerKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Apply software templates to running instances", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to tessera.toml
    #[arg(long, global = true, env = "TESSERA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Per-instance deadline in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Print machine-readable JSON instead of human output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a template to one or more instances
    Apply(ApplyArgs),

    /// Show what applying a template would change
    Diff(DiffArgs),

    /// Show the observed state of an instance
    Inspect(InspectArgs),

    /// Manage rollback checkpoints
    #[command(subcommand)]
    Checkpoints(CheckpointsCommand),

    /// Restore an instance to a checkpoint
    Rollback(RollbackArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply / Diff
// ============================================================================

#[derive(Parser)]
pub struct ApplyArgs {
    /// Template file (.toml or .json)
    pub template: PathBuf,

    /// Target instances
    #[arg(short, long = "instance", required = true, num_args = 1..)]
    pub instances: Vec<String>,

    /// Compute and print the plan without changing anything
    #[arg(short, long)]
    pub dry_run: bool,

    /// Apply despite conflicts
    #[arg(short, long)]
    pub force: bool,

    /// Install the template's packages with this manager instead
    #[arg(long, value_parser = clap::value_parser!(PackageManagerKind))]
    pub package_manager: Option<PackageManagerKind>,

    /// Instances applied in parallel (defaults to config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser)]
pub struct DiffArgs {
    /// Template file (.toml or .json)
    pub template: PathBuf,

    /// Target instance
    #[arg(short, long)]
    pub instance: String,

    /// Install the template's packages with this manager instead
    #[arg(long, value_parser = clap::value_parser!(PackageManagerKind))]
    pub package_manager: Option<PackageManagerKind>,
}

#[derive(Parser)]
pub struct InspectArgs {
    /// Instance to inspect
    pub instance: String,
}

// ============================================================================
// Checkpoints / Rollback
// ============================================================================

#[derive(Subcommand)]
pub enum CheckpointsCommand {
    /// List checkpoints for an instance, oldest first
    List {
        /// Instance name
        instance: String,
    },

    /// Snapshot an instance now
    Create {
        /// Instance name
        instance: String,

        /// What the checkpoint is for
        #[arg(short, long, default_value = "manual checkpoint")]
        description: String,
    },

    /// Delete all but the newest checkpoints
    Prune {
        /// Instance name
        instance: String,

        /// How many of the newest checkpoints to keep
        #[arg(short, long, default_value = "5")]
        keep: usize,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Parser)]
pub struct RollbackArgs {
    /// Instance name
    pub instance: String,

    /// Checkpoint id (see `tessera checkpoints list`)
    pub checkpoint: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}
