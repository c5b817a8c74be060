//! # Trial Harness CLI (`trials`)
//!
//! The `trials` binary is the primary interface for Trial Harness. It
//! provides commands for database initialization, reference-data loading,
//! corpus indexing, semantic search, cohort matching, feasibility
//! analysis, embedding management, and starting the MCP server.
//!
//! ## Usage
//!
//! ```bash
//! trials --config ./config/trials.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trials init` | Create the SQLite database and run schema migrations |
//! | `trials load patients <file>` | Load patient demographics from JSON |
//! | `trials load conditions <file>` | Load observed patient conditions from JSON |
//! | `trials index <file>` | Parse, chunk, and embed a trial corpus |
//! | `trials search "<query>"` | Semantic search over indexed trials |
//! | `trials match` | Find patients eligible for an age band + conditions |
//! | `trials analyze "<query>"` | Infer criteria and score recruitment feasibility |
//! | `trials embed pending` | Backfill missing or stale embeddings |
//! | `trials embed rebuild` | Delete and regenerate all embeddings |
//! | `trials serve mcp` | Start the MCP-compatible HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use trial_harness::retrieval::TrialFilter;
use trial_harness::store::Store;
use trial_harness::{config, embed_cmd, feasibility, ingest, matcher, migrate, retrieval, server};

/// Trial Harness CLI — clinical-trial document chunking, semantic cohort
/// matching, and recruitment feasibility analysis.
#[derive(Parser)]
#[command(
    name = "trials",
    about = "Trial Harness — clinical-trial chunking, cohort matching, and feasibility analysis",
    version,
    long_about = "Trial Harness parses semi-structured clinical-trial documents into typed \
    sections, packs them into bounded-size chunks for embedding, and exposes semantic cohort \
    matching and recruitment-feasibility analysis via a CLI and MCP-compatible HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trials.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Load reference data from a JSON export.
    Load {
        #[command(subcommand)]
        kind: LoadKind,
    },

    /// Index a trial corpus: parse sections, build chunks, embed.
    ///
    /// The corpus is a JSON object keyed by trial registry id, each entry
    /// carrying the raw document text and a flat metadata map. Embedding
    /// runs inline when a provider is configured and is non-fatal.
    Index {
        /// Path to the corpus JSON file.
        path: PathBuf,

        /// Show document and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Semantic search over indexed trials.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of trials to return.
        #[arg(long)]
        top_k: Option<usize>,

        /// Filter by trial phase (e.g. "Phase 2").
        #[arg(long)]
        phase: Option<String>,

        /// Filter by overall status (e.g. "Recruiting").
        #[arg(long)]
        status: Option<String>,

        /// Minimum enrollment target.
        #[arg(long)]
        min_enrollment: Option<i64>,
    },

    /// Find patients eligible for an age band and condition set.
    ///
    /// Returns the first N eligible patients in store order; the result is
    /// not ranked by similarity.
    Match {
        /// Minimum patient age, inclusive.
        #[arg(long)]
        age_min: i64,

        /// Maximum patient age, inclusive.
        #[arg(long)]
        age_max: i64,

        /// Required condition (repeatable). Matched semantically and
        /// conjunctively; omit for an age-only cohort.
        #[arg(long = "condition")]
        conditions: Vec<String>,

        /// Maximum number of patients to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Retrieve similar trials, infer criteria, and score feasibility.
    Analyze {
        /// Free-text description of the planned trial.
        query: String,

        /// Size of the retrieved trial sample.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Cap on the matched patient set.
        #[arg(long)]
        max_patients: Option<usize>,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Start the MCP-compatible HTTP server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Reference-data loading subcommands.
#[derive(Subcommand)]
enum LoadKind {
    /// Load patient demographics (array of patient objects).
    Patients {
        /// Path to the patients JSON file.
        path: PathBuf,
    },

    /// Load observed patient conditions (array of {patient_id, condition}).
    Conditions {
        /// Path to the conditions JSON file.
        path: PathBuf,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    Rebuild {
        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the MCP tool server on the configured bind address.
    Mcp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = Store::connect(&cfg).await?;
            migrate::run_migrations(&store).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Load { kind } => match kind {
            LoadKind::Patients { path } => {
                ingest::run_load_patients(&cfg, &path).await?;
            }
            LoadKind::Conditions { path } => {
                ingest::run_load_conditions(&cfg, &path).await?;
            }
        },
        Commands::Index {
            path,
            dry_run,
            limit,
        } => {
            ingest::run_index(&cfg, &path, dry_run, limit).await?;
        }
        Commands::Search {
            query,
            top_k,
            phase,
            status,
            min_enrollment,
        } => {
            let filter = TrialFilter {
                phase,
                status,
                min_enrollment,
            };
            retrieval::run_search(&cfg, &query, top_k, filter).await?;
        }
        Commands::Match {
            age_min,
            age_max,
            conditions,
            limit,
        } => {
            matcher::run_match(&cfg, age_min, age_max, conditions, limit).await?;
        }
        Commands::Analyze {
            query,
            top_k,
            max_patients,
        } => {
            feasibility::run_analyze(&cfg, &query, top_k, max_patients).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
