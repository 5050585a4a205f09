use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every catalog table and index. Safe to run repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            cik INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            name_as_of TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One current profile per company
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS company_profiles (
            cik INTEGER PRIMARY KEY,
            sic TEXT,
            sic_description TEXT,
            irs_number TEXT,
            state_of_incorporation TEXT,
            state_location TEXT,
            fiscal_year_end TEXT,
            phone TEXT,
            as_of TEXT,
            FOREIGN KEY (cik) REFERENCES companies(cik)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filings (
            accession_number TEXT PRIMARY KEY,
            cik INTEGER NOT NULL,
            form_type TEXT,
            date_filed TEXT,
            content_hash TEXT,
            path TEXT NOT NULL,
            document_count INTEGER NOT NULL DEFAULT 0,
            processed_document_count INTEGER NOT NULL DEFAULT 0,
            is_processed INTEGER NOT NULL DEFAULT 0,
            is_error INTEGER NOT NULL DEFAULT 1,
            error_message TEXT,
            date_downloaded TEXT NOT NULL,
            FOREIGN KEY (cik) REFERENCES companies(cik)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filing_documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            accession_number TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            type TEXT,
            file_name TEXT,
            content_type TEXT NOT NULL,
            description TEXT,
            content_hash TEXT NOT NULL,
            start_pos INTEGER NOT NULL,
            end_pos INTEGER NOT NULL,
            is_processed INTEGER NOT NULL DEFAULT 0,
            is_error INTEGER NOT NULL DEFAULT 0,
            UNIQUE(accession_number, sequence),
            FOREIGN KEY (accession_number) REFERENCES filings(accession_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_filings_path ON filings(path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_filings_cik ON filings(cik)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_filing_documents_hash ON filing_documents(content_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
