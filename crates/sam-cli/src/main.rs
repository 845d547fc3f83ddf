mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{context::ContextSubcommand, task::TaskSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sam",
    about = "Spec-driven development: compile specs into task registries and resolve layered context",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .sam/ or .git/)
    #[arg(long, global = true, env = "SAM_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse TECHNICAL_SPEC.md and write TASKS.json
    Parse {
        /// Feature directory or id under .sam/
        feature: String,
    },

    /// Show the heading outline of a feature's spec
    Outline { feature: String },

    /// Split the spec into a main document, phase files and TASKS.json
    Migrate {
        feature: String,

        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Overwrite an existing TASKS.json and IMPLEMENTATION_TASKS/
        #[arg(long)]
        force: bool,
    },

    /// Inspect and update the task registry
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Read, edit and apply layered CONTEXT.yaml values
    Context {
        #[command(subcommand)]
        subcommand: ContextSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Parse { feature } => cmd::parse::run(&root, &feature, cli.json),
        Commands::Outline { feature } => cmd::outline::run(&root, &feature, cli.json),
        Commands::Migrate {
            feature,
            dry_run,
            force,
        } => cmd::migrate::run(&root, &feature, dry_run, force, cli.json),
        Commands::Task { subcommand } => cmd::task::run(&root, subcommand, cli.json),
        Commands::Context { subcommand } => cmd::context::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
