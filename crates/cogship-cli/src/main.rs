mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cogship",
    about = "Push Cog models through candidate and official releases, one model or many at once",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from cogship.yaml or .git/)
    #[arg(long, global = true, env = "COGSHIP_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log pipeline steps (RUST_LOG overrides)
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered models
    Models,

    /// Select a model and render its push configuration
    Select {
        /// Model id
        model: Option<String>,

        /// List valid model ids instead
        #[arg(long, short = 'l', conflicts_with = "model")]
        list: bool,

        /// Write the rendered configuration here instead of stdout
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Run the candidate + official push pipeline
    Push {
        /// Model id, comma-separated ids, or 'all'
        selection: String,

        /// Maximum models pushed at once (default: from cogship.yaml, else all)
        #[arg(long)]
        max_parallel: Option<usize>,
    },

    /// Inspect and validate cogship.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Models => cmd::models::run(&root, cli.json),
        Commands::Select { model, list, out } => {
            cmd::select::run(&root, model.as_deref(), list, out.as_deref(), cli.json)
        }
        Commands::Push {
            selection,
            max_parallel,
        } => cmd::push::run(&root, &selection, max_parallel, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
