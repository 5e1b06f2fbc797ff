//! # Mailcue CLI (`mailcue`)
//!
//! The `mailcue` binary drives the reply-capture and drafting pipeline. It
//! provides commands for database initialization, one-shot capture and
//! suggestion runs, record management, the HTTP surface, and the
//! long-running watch mode.
//!
//! ## Usage
//!
//! ```bash
//! mailcue --config ./config/mailcue.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mailcue init` | Create the SQLite database and run schema migrations |
//! | `mailcue watch` | Watch the page snapshot, serve HTTP, react to sends |
//! | `mailcue suggest` | Draft a reply for the conversation on the page |
//! | `mailcue capture` | Wait for one sent reply and record the pair |
//! | `mailcue records list` | List captured pairs |
//! | `mailcue records add` | Store a hand-written example pair |
//! | `mailcue records rm <id>` | Delete a pair |
//! | `mailcue serve` | Start the HTTP surface on its own |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use mailcue::server::AppState;
use mailcue::status::StatusBus;
use mailcue::store::RecordStore;
use mailcue::{capture, config, migrate, records, runtime, server, suggest};

/// Mailcue — reply capture and retrieval-augmented drafting for email
/// clients.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mailcue.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mailcue",
    about = "Mailcue — reply capture and retrieval-augmented drafting for email clients",
    version,
    long_about = "Mailcue watches an HTML snapshot of a webmail conversation, records every \
    {incoming, reply} pair the user sends, and drafts replies to new conversations by ranking \
    prior pairs with a local language model and imitating the matches."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mailcue.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the record database schema.
    ///
    /// Creates the SQLite database file and the records table. This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Watch the page snapshot and react to navigation and sends.
    ///
    /// Starts the HTTP surface, drafts a suggestion whenever a new
    /// conversation appears on the page, and records a pair whenever the
    /// send signal fires. Runs until Ctrl-C.
    Watch,

    /// Draft a reply for the conversation currently on the page.
    ///
    /// One-shot suggestion run: extracts the newest incoming message,
    /// ranks prior pairs for similarity, and prints the drafted reply.
    Suggest,

    /// Wait for one sent reply and record the pair.
    ///
    /// One-shot capture run: snapshots the incoming message, waits for the
    /// reply to appear on the page, and appends the summarized pair.
    Capture,

    /// Manage captured record pairs.
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },

    /// Start the HTTP surface on its own.
    ///
    /// Serves status and record CRUD without the page watcher; useful when
    /// another process runs the pipelines.
    Serve,
}

/// Record management subcommands.
#[derive(Subcommand)]
enum RecordsAction {
    /// List captured pairs, most recent first.
    List,

    /// Store a hand-written example pair.
    Add {
        /// The incoming message text.
        input: String,

        /// The reply text.
        output: String,
    },

    /// Delete a pair by id.
    Rm {
        /// Record id (UUID).
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Watch => {
            runtime::run_watch(&cfg).await?;
        }
        Commands::Suggest => {
            suggest::run_suggest(&cfg).await?;
        }
        Commands::Capture => {
            capture::run_capture(&cfg).await?;
        }
        Commands::Records { action } => match action {
            RecordsAction::List => records::list_records(&cfg).await?,
            RecordsAction::Add { input, output } => {
                records::add_record(&cfg, &input, &output).await?
            }
            RecordsAction::Rm { id } => records::remove_record(&cfg, &id).await?,
        },
        Commands::Serve => {
            let store = Arc::new(RecordStore::new(&cfg));
            if !store
                .wait_until_ready(cfg.watcher.store_ready_timeout_ms)
                .await
            {
                anyhow::bail!(
                    "store not ready after {}ms (run `mailcue init` first?)",
                    cfg.watcher.store_ready_timeout_ms
                );
            }
            let state = AppState {
                store,
                bus: Arc::new(StatusBus::new()),
                fetch_attempts: cfg.retrieval.fetch_attempts,
            };
            server::run_server(&cfg, state).await?;
        }
    }

    Ok(())
}
