//! Catalog reconciliation against the SQLite schema.
//!
//! The catalog is the authority for what has been ingested: a Filing row is
//! keyed by its accession number and is created exactly once. Rows start
//! pessimistic (`is_error = 1`) and are flipped to processed in the same
//! transaction that inserts their documents, so a crash at any point leaves
//! either an error row or a complete filing.
//!
//! Creation races between workers are settled by the table constraints: a
//! uniqueness violation is answered with one re-read of the row that won.

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{is_unique_violation, CatalogError};
use crate::models::{Company, CompanyProfile, Filing, FilingDocument, IndexEntry, NewFiling};

const DATE_FORMAT: &str = "%Y-%m-%d";

const FILING_COLUMNS: &str = "accession_number, cik, form_type, date_filed, content_hash, path, \
     document_count, processed_document_count, is_processed, is_error, error_message, date_downloaded";

/// Row totals for the status report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub companies: i64,
    pub filings: i64,
    pub processed: i64,
    /// Error rows with a recorded message.
    pub errored: i64,
    /// Rows still in their pessimistic initial state.
    pub pending: i64,
    pub documents: i64,
    pub distinct_hashes: i64,
}

/// Handle over the catalog tables.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_company(&self, cik: i64) -> Result<Option<Company>, CatalogError> {
        let row = sqlx::query("SELECT cik, name, name_as_of FROM companies WHERE cik = ?")
            .bind(cik)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| company_from_row(&r)).transpose()
    }

    /// Return the company for `cik`, creating it on first reference.
    ///
    /// An existing company is renamed when `name` differs and `as_of` is not
    /// older than the date its current name was observed.
    pub async fn get_or_create_company(
        &self,
        cik: i64,
        name: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<Company, CatalogError> {
        if let Some(existing) = self.find_company(cik).await? {
            return self.refresh_company_name(existing, name, as_of).await;
        }
        self.create_company(cik, name, as_of).await
    }

    /// Insert a company believed to be absent. Losing a creation race to
    /// another writer resolves to the winner's row.
    async fn create_company(
        &self,
        cik: i64,
        name: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<Company, CatalogError> {
        let inserted = sqlx::query("INSERT INTO companies (cik, name, name_as_of) VALUES (?, ?, ?)")
            .bind(cik)
            .bind(name)
            .bind(date_to_sql(as_of))
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => {
                info!(cik, name, "created company");
                Ok(Company {
                    cik,
                    name: name.to_string(),
                    name_as_of: as_of,
                })
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(cik, "company created concurrently; re-reading");
                let existing = self
                    .find_company(cik)
                    .await?
                    .ok_or(CatalogError::ConflictUnresolved(cik))?;
                self.refresh_company_name(existing, name, as_of).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_company_name(
        &self,
        existing: Company,
        name: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<Company, CatalogError> {
        if !should_rename(&existing, name, as_of) {
            return Ok(existing);
        }

        sqlx::query("UPDATE companies SET name = ?, name_as_of = ? WHERE cik = ?")
            .bind(name)
            .bind(date_to_sql(as_of))
            .bind(existing.cik)
            .execute(&self.pool)
            .await?;
        info!(
            cik = existing.cik,
            old = %existing.name,
            new = name,
            "company name changed"
        );

        Ok(Company {
            cik: existing.cik,
            name: name.to_string(),
            name_as_of: as_of,
        })
    }

    /// Insert the profile for `cik` unless one is already recorded.
    ///
    /// Returns `true` when a row was written.
    pub async fn ensure_profile(
        &self,
        cik: i64,
        profile: &CompanyProfile,
        as_of: Option<NaiveDate>,
    ) -> Result<bool, CatalogError> {
        let result = sqlx::query(
            r#"
            INSERT INTO company_profiles (cik, sic, sic_description, irs_number,
                state_of_incorporation, state_location, fiscal_year_end, phone, as_of)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cik) DO NOTHING
            "#,
        )
        .bind(cik)
        .bind(&profile.sic)
        .bind(&profile.sic_description)
        .bind(&profile.irs_number)
        .bind(&profile.state_of_incorporation)
        .bind(&profile.state_location)
        .bind(&profile.fiscal_year_end)
        .bind(&profile.phone)
        .bind(date_to_sql(as_of))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_profile(&self, cik: i64) -> Result<Option<CompanyProfile>, CatalogError> {
        let row = sqlx::query(
            "SELECT sic, sic_description, irs_number, state_of_incorporation, state_location, \
             fiscal_year_end, phone FROM company_profiles WHERE cik = ?",
        )
        .bind(cik)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<CompanyProfile, CatalogError> {
            Ok(CompanyProfile {
                sic: r.try_get("sic")?,
                sic_description: r.try_get("sic_description")?,
                irs_number: r.try_get("irs_number")?,
                state_of_incorporation: r.try_get("state_of_incorporation")?,
                state_location: r.try_get("state_location")?,
                fiscal_year_end: r.try_get("fiscal_year_end")?,
                phone: r.try_get("phone")?,
            })
        })
        .transpose()
    }

    pub async fn find_filing(&self, accession_number: &str) -> Result<Option<Filing>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM filings WHERE accession_number = ?",
            FILING_COLUMNS
        ))
        .bind(accession_number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| filing_from_row(&r)).transpose()
    }

    pub async fn find_filing_by_path(&self, path: &str) -> Result<Option<Filing>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM filings WHERE path = ? LIMIT 1",
            FILING_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| filing_from_row(&r)).transpose()
    }

    /// Insert a Filing in the pessimistic initial state.
    ///
    /// Fails with [`CatalogError::AlreadyExists`] when the accession is taken.
    pub async fn insert_pending_filing(&self, filing: &NewFiling) -> Result<(), CatalogError> {
        let result = sqlx::query(
            r#"
            INSERT INTO filings (accession_number, cik, form_type, date_filed, content_hash, path,
                document_count, processed_document_count, is_processed, is_error, error_message,
                date_downloaded)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, 1, NULL, ?)
            "#,
        )
        .bind(&filing.accession_number)
        .bind(filing.cik)
        .bind(&filing.form_type)
        .bind(date_to_sql(filing.date_filed))
        .bind(&filing.content_hash)
        .bind(&filing.path)
        .bind(filing.document_count)
        .bind(today())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(CatalogError::AlreadyExists(filing.accession_number.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert every document and mark the filing processed, atomically.
    pub async fn commit_documents(
        &self,
        accession_number: &str,
        documents: &[FilingDocument],
    ) -> Result<usize, CatalogError> {
        let mut tx = self.pool.begin().await?;

        for doc in documents {
            sqlx::query(
                r#"
                INSERT INTO filing_documents (accession_number, sequence, type, file_name,
                    content_type, description, content_hash, start_pos, end_pos,
                    is_processed, is_error)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(accession_number)
            .bind(doc.sequence)
            .bind(&doc.doc_type)
            .bind(&doc.file_name)
            .bind(&doc.content_type)
            .bind(&doc.description)
            .bind(&doc.content_hash)
            .bind(doc.start_pos)
            .bind(doc.end_pos)
            .bind(doc.is_processed)
            .bind(doc.is_error)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE filings
            SET is_processed = 1, is_error = 0, error_message = NULL,
                processed_document_count = ?
            WHERE accession_number = ?
            "#,
        )
        .bind(documents.len() as i64)
        .bind(accession_number)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(documents.len())
    }

    /// Roll a pending filing to the error state.
    pub async fn mark_filing_error(
        &self,
        accession_number: &str,
        message: &str,
    ) -> Result<(), CatalogError> {
        sqlx::query(
            "UPDATE filings SET is_processed = 0, is_error = 1, error_message = ? \
             WHERE accession_number = ?",
        )
        .bind(message)
        .bind(accession_number)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record an error filing from index metadata alone.
    ///
    /// Creates the owning company when needed. Returns `false` when a row for
    /// the accession already existed and was left as is.
    pub async fn record_error_filing(
        &self,
        entry: &IndexEntry,
        message: &str,
    ) -> Result<bool, CatalogError> {
        self.get_or_create_company(entry.cik, &entry.company_name, entry.date_filed)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO filings (accession_number, cik, form_type, date_filed, content_hash, path,
                document_count, processed_document_count, is_processed, is_error, error_message,
                date_downloaded)
            VALUES (?, ?, ?, ?, NULL, ?, 0, 0, 0, 1, ?, ?)
            ON CONFLICT(accession_number) DO NOTHING
            "#,
        )
        .bind(&entry.accession_number)
        .bind(entry.cik)
        .bind(non_empty(&entry.form_type))
        .bind(date_to_sql(entry.date_filed))
        .bind(&entry.path)
        .bind(message)
        .bind(today())
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() > 0;
        if created {
            warn!(
                accession = %entry.accession_number,
                path = %entry.path,
                message,
                "recorded error filing"
            );
        }
        Ok(created)
    }

    /// Error filings, most recently downloaded first.
    pub async fn list_errors(&self, limit: i64) -> Result<Vec<Filing>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM filings WHERE is_error = 1 \
             ORDER BY date_downloaded DESC, accession_number LIMIT ?",
            FILING_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(filing_from_row).collect()
    }

    /// Delete an error filing so the next pass ingests it again.
    ///
    /// Only rows with `is_error = 1` and no documents are removed.
    pub async fn delete_error_filing(&self, accession_number: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query(
            r#"
            DELETE FROM filings
            WHERE accession_number = ?
              AND is_error = 1
              AND NOT EXISTS (
                  SELECT 1 FROM filing_documents d
                  WHERE d.accession_number = filings.accession_number
              )
            "#,
        )
        .bind(accession_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn documents_for(
        &self,
        accession_number: &str,
    ) -> Result<Vec<FilingDocument>, CatalogError> {
        let rows = sqlx::query(
            r#"
            SELECT accession_number, sequence, type, file_name, content_type, description,
                   content_hash, start_pos, end_pos, is_processed, is_error
            FROM filing_documents
            WHERE accession_number = ?
            ORDER BY sequence
            "#,
        )
        .bind(accession_number)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<FilingDocument, CatalogError> {
                Ok(FilingDocument {
                    accession_number: r.try_get("accession_number")?,
                    sequence: r.try_get("sequence")?,
                    doc_type: r.try_get("type")?,
                    file_name: r.try_get("file_name")?,
                    content_type: r.try_get("content_type")?,
                    description: r.try_get("description")?,
                    content_hash: r.try_get("content_hash")?,
                    start_pos: r.try_get("start_pos")?,
                    end_pos: r.try_get("end_pos")?,
                    is_processed: r.try_get("is_processed")?,
                    is_error: r.try_get("is_error")?,
                })
            })
            .collect()
    }

    pub async fn counts(&self) -> Result<CatalogCounts, CatalogError> {
        let companies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
            .fetch_one(&self.pool)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS filings,
                COALESCE(SUM(CASE WHEN is_processed = 1 THEN 1 ELSE 0 END), 0) AS processed,
                COALESCE(SUM(CASE WHEN is_error = 1 AND error_message IS NOT NULL THEN 1 ELSE 0 END), 0) AS errored,
                COALESCE(SUM(CASE WHEN is_error = 1 AND error_message IS NULL THEN 1 ELSE 0 END), 0) AS pending
            FROM filings
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let doc_row = sqlx::query(
            "SELECT COUNT(*) AS documents, COUNT(DISTINCT content_hash) AS hashes FROM filing_documents",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogCounts {
            companies,
            filings: row.try_get("filings")?,
            processed: row.try_get("processed")?,
            errored: row.try_get("errored")?,
            pending: row.try_get("pending")?,
            documents: doc_row.try_get("documents")?,
            distinct_hashes: doc_row.try_get("hashes")?,
        })
    }
}

fn should_rename(existing: &Company, name: &str, as_of: Option<NaiveDate>) -> bool {
    if name.is_empty() || existing.name == name {
        return false;
    }
    if existing.name.is_empty() {
        return true;
    }
    match (existing.name_as_of, as_of) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(current), Some(incoming)) => incoming >= current,
    }
}

fn company_from_row(row: &SqliteRow) -> Result<Company, CatalogError> {
    Ok(Company {
        cik: row.try_get("cik")?,
        name: row.try_get("name")?,
        name_as_of: date_from_sql(row.try_get("name_as_of")?),
    })
}

fn filing_from_row(row: &SqliteRow) -> Result<Filing, CatalogError> {
    let downloaded: String = row.try_get("date_downloaded")?;
    Ok(Filing {
        accession_number: row.try_get("accession_number")?,
        cik: row.try_get("cik")?,
        form_type: row.try_get("form_type")?,
        date_filed: date_from_sql(row.try_get("date_filed")?),
        content_hash: row.try_get("content_hash")?,
        path: row.try_get("path")?,
        document_count: row.try_get("document_count")?,
        processed_document_count: row.try_get("processed_document_count")?,
        is_processed: row.try_get("is_processed")?,
        is_error: row.try_get("is_error")?,
        error_message: row.try_get("error_message")?,
        date_downloaded: date_from_sql(Some(downloaded)).unwrap_or(NaiveDate::MIN),
    })
}

fn date_to_sql(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn date_from_sql(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok())
}

fn today() -> String {
    Utc::now().date_naive().format(DATE_FORMAT).to_string()
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
