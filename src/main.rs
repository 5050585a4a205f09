//! # EDGAR Ingest CLI (`edgar`)
//!
//! The `edgar` binary drives the ingestion pipeline: database setup,
//! archive browsing, single-filing and quarterly-index ingestion, and
//! error-filing maintenance.
//!
//! ## Usage
//!
//! ```bash
//! edgar --config ./config/edgar.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `edgar init` | Create the SQLite database and schema |
//! | `edgar list <path>` | Print a remote directory listing |
//! | `edgar ingest-filing <path>` | Ingest one composite filing |
//! | `edgar ingest-index` | Ingest every filing in a quarterly index |
//! | `edgar errors` | List error filings |
//! | `edgar redrive <accession>` | Clear an error filing so it is retried |
//! | `edgar status` | Catalog and store summary |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter);
//! command reports go to stdout.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgar_ingest::ingest::IndexSource;
use edgar_ingest::{config, index, ingest, listing, migrate, status};

/// EDGAR Ingest CLI: download, split and catalog filings from the public
/// filing archive.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/edgar.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "edgar",
    about = "EDGAR Ingest — filing archive ingestion pipeline",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/edgar.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Print the child paths of a remote archive directory.
    List {
        /// Remote directory, e.g. `/Archives/edgar/data/320193/`.
        path: String,
    },

    /// Ingest a single composite filing.
    IngestFiling {
        /// Archive path, e.g. `edgar/data/320193/0000320193-24-000006.txt`.
        path: String,

        /// Accession number (defaults to the file stem).
        #[arg(long)]
        accession: Option<String>,

        /// Registrant CIK (defaults to the path's CIK segment).
        #[arg(long)]
        cik: Option<i64>,

        #[arg(long)]
        form_type: Option<String>,

        /// Filing date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,
    },

    /// Ingest every filing listed in a quarterly index.
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["year", "index_file"])
    ))]
    IngestIndex {
        #[arg(long, requires = "quarter")]
        year: Option<i32>,

        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        quarter: Option<u8>,

        /// Local copy of a `master.idx` file.
        #[arg(long)]
        index_file: Option<PathBuf>,

        /// Only ingest these form types (repeatable). Overrides `ingest.form_types`.
        #[arg(long = "form-type")]
        form_types: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Concurrent filings (defaults to `ingest.workers`).
        #[arg(long)]
        workers: Option<usize>,

        /// Show what would be ingested without fetching anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// List error filings.
    Errors {
        #[arg(long, default_value = "50")]
        limit: i64,

        /// Print the rows as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete an error filing so the next pass retries it.
    Redrive { accession: String },

    /// Show catalog and store statistics.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::List { path } => {
            listing::run_list(&cfg, &path).await?;
        }
        Commands::IngestFiling {
            path,
            accession,
            cik,
            form_type,
            date,
        } => {
            let mut entry = match index::entry_from_path(&path) {
                Some(entry) => entry,
                None => {
                    let Some(cik) = cik else {
                        bail!("Cannot derive a CIK from '{}'; pass --cik", path);
                    };
                    let archive = index::archive_path(&path);
                    let Some(accession_number) = index::accession_from_path(&archive) else {
                        bail!("Cannot derive an accession number from '{}'", path);
                    };
                    edgar_ingest::models::IndexEntry {
                        accession_number,
                        form_type: String::new(),
                        cik,
                        company_name: String::new(),
                        date_filed: None,
                        path: archive,
                    }
                }
            };
            if let Some(accession) = accession {
                entry.accession_number = accession;
            }
            if let Some(cik) = cik {
                entry.cik = cik;
            }
            if let Some(form_type) = form_type {
                entry.form_type = form_type;
            }
            if let Some(date) = date {
                entry.date_filed = Some(
                    NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                        .with_context(|| format!("Invalid --date '{}'", date))?,
                );
            }
            ingest::run_ingest_filing(&cfg, entry).await?;
        }
        Commands::IngestIndex {
            year,
            quarter,
            index_file,
            form_types,
            limit,
            workers,
            dry_run,
        } => {
            let source = match (year, quarter, index_file) {
                (_, _, Some(file)) => IndexSource::File(file),
                (Some(year), Some(quarter), None) => IndexSource::Quarter { year, quarter },
                _ => bail!("Either --year with --quarter or --index-file is required"),
            };
            ingest::run_ingest_index(&cfg, source, &form_types, limit, workers, dry_run).await?;
        }
        Commands::Errors { limit, json } => {
            status::run_errors(&cfg, limit, json).await?;
        }
        Commands::Redrive { accession } => {
            status::run_redrive(&cfg, &accession).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
