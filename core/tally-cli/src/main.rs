//! tally: diagnostic CLI for the Tally sync core.
//!
//! Reads and drives the same on-disk state the apps use (`~/.tally` by
//! default, or `--root`).
//!
//! ## Subcommands
//!
//! - `counter`: show or mutate the mirrored mistake counter
//! - `sessions`: list stored sessions, newest first
//! - `ingest`: reconcile a JSON session envelope as if it had been received
//! - `messages`: list or clear saved notes

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tally_core::{StorageConfig, TallyConfig, TallyError};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Tally sync core diagnostics")]
#[command(version)]
struct Cli {
    /// Data root (defaults to ~/.tally)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change the mistake counter
    Counter {
        #[arg(value_enum, default_value_t = CounterAction::Show)]
        action: CounterAction,
    },

    /// List stored sessions
    Sessions {
        /// Maximum number of sessions to print
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Reconcile a session envelope from a JSON file
    Ingest {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List saved notes
    Messages {
        /// Remove all saved notes
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CounterAction {
    Show,
    Increment,
    Decrement,
    Reset,
}

fn main() {
    let cli = Cli::parse();

    let storage = match cli.root {
        Some(root) => StorageConfig::with_root(root),
        None => match StorageConfig::from_home() {
            Ok(storage) => storage,
            Err(err) => {
                eprintln!("tally: {}", err);
                std::process::exit(1);
            }
        },
    };
    let _logging_guard = tally_core::logging::init(&storage);

    let config = match TallyConfig::load(&storage.config_file()) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to load config; using defaults");
            TallyConfig::default()
        }
    };
    let storage = match &config.mirror.shared_region_dir {
        Some(dir) => storage.with_shared_dir(dir.clone()),
        None => storage,
    };

    let mut out = std::io::stdout().lock();
    let result: Result<(), TallyError> = match cli.command {
        Commands::Counter { action } => commands::counter(&storage, action, &mut out),
        Commands::Sessions { limit, json } => commands::sessions(&storage, limit, json, &mut out),
        Commands::Ingest { file } => commands::ingest(&storage, &config, &file, &mut out),
        Commands::Messages { clear } => commands::messages(&storage, clear, &mut out),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "tally command failed");
        eprintln!("tally: {}", err);
        std::process::exit(1);
    }
}
