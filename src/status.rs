//! Catalog overview and error-filing maintenance.
//!
//! Backs `edgar status`, `edgar errors` and `edgar redrive`: what has been
//! ingested, what failed and why, and a way to clear a failed filing so the
//! next pass retries it.

use anyhow::{bail, Result};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;
use crate::store::open_store;

/// Run the status command: query the catalog and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let catalog = Catalog::new(pool);
    let counts = catalog.counts().await?;
    let store_line = match open_store(&config.storage) {
        Ok(store) => format!("{} ({})", store.location(), store.backend()),
        Err(e) => format!("{} (unavailable: {})", config.storage.backend, e),
    };

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("EDGAR Ingest — Catalog Status");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Store:       {}", store_line);
    println!();
    println!("  Companies:   {}", counts.companies);
    println!("  Filings:     {}", counts.filings);
    println!("    processed: {}", counts.processed);
    println!("    errored:   {}", counts.errored);
    println!("    pending:   {}", counts.pending);
    println!(
        "  Documents:   {} ({} distinct)",
        counts.documents, counts.distinct_hashes
    );
    println!();

    catalog.pool().close().await;
    Ok(())
}

/// Run the errors command: list error filings with their messages.
pub async fn run_errors(config: &Config, limit: i64, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let catalog = Catalog::new(pool);
    let errors = catalog.list_errors(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&errors)?);
    } else if errors.is_empty() {
        println!("No error filings.");
    } else {
        println!(
            "{:<22} {:>10} {:<10} {:<11}  {}",
            "ACCESSION", "CIK", "FORM", "DOWNLOADED", "MESSAGE"
        );
        println!("{}", "-".repeat(90));
        for f in &errors {
            println!(
                "{:<22} {:>10} {:<10} {:<11}  {}",
                f.accession_number,
                f.cik,
                f.form_type.as_deref().unwrap_or("-"),
                f.date_downloaded,
                f.error_message.as_deref().unwrap_or("(in progress)")
            );
        }
    }

    catalog.pool().close().await;
    Ok(())
}

/// Run the redrive command: delete one error filing.
pub async fn run_redrive(config: &Config, accession_number: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let catalog = Catalog::new(pool);
    let deleted = catalog.delete_error_filing(accession_number).await?;
    catalog.pool().close().await;

    if !deleted {
        bail!(
            "No error filing with accession number '{}' (processed filings cannot be re-driven)",
            accession_number
        );
    }
    println!("Cleared error filing {}; the next pass will retry it.", accession_number);
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
