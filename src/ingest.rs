//! Ingestion orchestration.
//!
//! Drives one filing through fetch → split → store → reconcile, and runs a
//! bounded worker pool over an index feed. Every unit ends in exactly one
//! [`IngestOutcome`]; failures are recorded in the catalog as error filings
//! and never abort the batch.

use anyhow::{bail, Result};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::catalog::Catalog;
use crate::config::{Config, IngestConfig};
use crate::db;
use crate::error::{CatalogError, StoreError};
use crate::index;
use crate::models::{FilingDocument, FilingRecord, IndexEntry, NewFiling};
use crate::retriever::Retriever;
use crate::split::{sha256_hex, split_filing};
use crate::store::{open_store, ContentKind, ContentStore};

/// Pipeline stage at which a unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Parse,
    Store,
    Reconcile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Store => "store",
            Stage::Reconcile => "reconcile",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Reconciled {
        accession_number: String,
        documents: usize,
        blobs_written: usize,
    },
    AlreadyIngested,
    Errored {
        stage: Stage,
        message: String,
    },
}

/// Which derived content to persist for each document.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub store_raw: bool,
    pub store_text: bool,
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            store_raw: config.store_raw,
            store_text: config.store_text,
        }
    }
}

/// A failed unit, with the best metadata known at the time.
struct Failure {
    stage: Stage,
    message: String,
    entry: IndexEntry,
    /// The pending Filing row for `entry.accession_number` exists.
    pending: bool,
}

impl Failure {
    fn new(stage: Stage, entry: &IndexEntry, message: impl ToString) -> Self {
        Self {
            stage,
            message: message.to_string(),
            entry: entry.clone(),
            pending: false,
        }
    }
}

pub struct Orchestrator {
    retriever: Retriever,
    store: Arc<dyn ContentStore>,
    catalog: Catalog,
    options: IngestOptions,
}

impl Orchestrator {
    pub fn new(
        retriever: Retriever,
        store: Arc<dyn ContentStore>,
        catalog: Catalog,
        options: IngestOptions,
    ) -> Self {
        Self {
            retriever,
            store,
            catalog,
            options,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self::new(
            Retriever::from_config(&config.http)?,
            open_store(&config.storage)?,
            Catalog::new(pool),
            IngestOptions::from(&config.ingest),
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Ingest one filing end to end.
    #[instrument(skip_all, fields(accession = %entry.accession_number, path = %entry.path))]
    pub async fn ingest(&self, entry: &IndexEntry) -> IngestOutcome {
        match self.run(entry).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                self.record_failure(&failure).await;
                IngestOutcome::Errored {
                    stage: failure.stage,
                    message: failure.message,
                }
            }
        }
    }

    async fn run(&self, entry: &IndexEntry) -> Result<IngestOutcome, Failure> {
        if self
            .already_ingested(&entry.accession_number, Some(&entry.path))
            .await
            .map_err(|e| Failure::new(Stage::Reconcile, entry, e))?
        {
            debug!("filing already in catalog");
            return Ok(IngestOutcome::AlreadyIngested);
        }

        let raw = self.load_raw(entry).await?;

        let record = split_filing(&raw, self.options.store_text)
            .map_err(|e| Failure::new(Stage::Parse, entry, e))?;

        let known = merge_entry(entry, &record);
        if known.accession_number != entry.accession_number
            && self
                .already_ingested(&known.accession_number, None)
                .await
                .map_err(|e| Failure::new(Stage::Reconcile, &known, e))?
        {
            debug!(parsed = %known.accession_number, "parsed accession already in catalog");
            return Ok(IngestOutcome::AlreadyIngested);
        }

        self.catalog
            .get_or_create_company(known.cik, &known.company_name, known.date_filed)
            .await
            .map_err(|e| Failure::new(Stage::Reconcile, &known, e))?;
        if record.profile != Default::default() {
            self.catalog
                .ensure_profile(known.cik, &record.profile, known.date_filed)
                .await
                .map_err(|e| Failure::new(Stage::Reconcile, &known, e))?;
        }

        let parsed = record.document_count();
        let pending = NewFiling {
            accession_number: known.accession_number.clone(),
            cik: known.cik,
            form_type: record.form_type.clone(),
            date_filed: known.date_filed,
            content_hash: Some(sha256_hex(&raw)),
            path: known.path.clone(),
            document_count: record.declared_document_count.unwrap_or(parsed as i64),
        };
        match self.catalog.insert_pending_filing(&pending).await {
            Ok(()) => {}
            Err(CatalogError::AlreadyExists(_)) => {
                debug!("filing created concurrently");
                return Ok(IngestOutcome::AlreadyIngested);
            }
            Err(e) => return Err(Failure::new(Stage::Reconcile, &known, e)),
        }

        let fail_pending = |stage: Stage, message: String| Failure {
            stage,
            message,
            entry: known.clone(),
            pending: true,
        };

        let blobs_written = self
            .store_documents(&raw, &record)
            .await
            .map_err(|e| fail_pending(Stage::Store, e.to_string()))?;

        let documents = document_rows(&known.accession_number, &record);
        self.catalog
            .commit_documents(&known.accession_number, &documents)
            .await
            .map_err(|e| fail_pending(Stage::Reconcile, e.to_string()))?;

        if let Some(declared) = record.declared_document_count {
            if declared != parsed as i64 {
                warn!(declared, parsed, "document count mismatch");
            }
        }

        info!(documents = parsed, blobs_written, "filing reconciled");
        Ok(IngestOutcome::Reconciled {
            accession_number: known.accession_number,
            documents: parsed,
            blobs_written,
        })
    }

    async fn already_ingested(
        &self,
        accession_number: &str,
        path: Option<&str>,
    ) -> Result<bool, CatalogError> {
        if self.catalog.find_filing(accession_number).await?.is_some() {
            return Ok(true);
        }
        match path {
            Some(path) => Ok(self.catalog.find_filing_by_path(path).await?.is_some()),
            None => Ok(false),
        }
    }

    /// Raw filing bytes, from the store cache when present, otherwise from
    /// the network (and then cached).
    async fn load_raw(&self, entry: &IndexEntry) -> Result<Vec<u8>, Failure> {
        match self.store.path_exists(&entry.path).await {
            Ok(true) => match self.store.get(&entry.path).await {
                Ok(bytes) => {
                    debug!(bytes = bytes.len(), "using cached filing");
                    return Ok(bytes);
                }
                Err(e) => warn!(error = %e, "cached filing unreadable; fetching"),
            },
            Ok(false) => {}
            Err(e) => warn!(error = %e, "unable to check filing cache"),
        }

        let remote = format!("/Archives/{}", entry.path);
        let fetched = match self.retriever.fetch(&remote).await {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                return Err(Failure::new(
                    Stage::Fetch,
                    entry,
                    format!("unable to retrieve {}", remote),
                ))
            }
            Err(e) => return Err(Failure::new(Stage::Fetch, entry, e)),
        };

        if let Err(e) = self.store.put_path(&entry.path, &fetched.bytes).await {
            warn!(error = %e, "unable to cache filing");
        }
        Ok(fetched.bytes)
    }

    /// Store raw and text blobs for every document. Returns how many blobs
    /// were newly written.
    async fn store_documents(
        &self,
        raw: &[u8],
        record: &FilingRecord,
    ) -> Result<usize, StoreError> {
        let mut written = 0;
        for doc in &record.documents {
            if self.options.store_raw {
                let stored = self
                    .store
                    .put(&doc.content_hash, ContentKind::Raw, &raw[doc.start_pos..doc.end_pos])
                    .await?;
                written += stored.written as usize;
            }
            if self.options.store_text {
                if let Some(text) = &doc.text {
                    let stored = self
                        .store
                        .put(&doc.content_hash, ContentKind::Text, text.as_bytes())
                        .await?;
                    written += stored.written as usize;
                }
            }
        }
        Ok(written)
    }

    async fn record_failure(&self, failure: &Failure) {
        error!(stage = %failure.stage, message = %failure.message, "ingestion failed");

        let result = if failure.pending {
            self.catalog
                .mark_filing_error(&failure.entry.accession_number, &failure.message)
                .await
        } else {
            self.catalog
                .record_error_filing(&failure.entry, &failure.message)
                .await
                .map(|_| ())
        };

        if let Err(e) = result {
            error!(error = %e, "unable to record error filing");
        }
    }
}

/// Index metadata overlaid with what the filing header says.
fn merge_entry(entry: &IndexEntry, record: &FilingRecord) -> IndexEntry {
    IndexEntry {
        accession_number: record
            .accession_number
            .clone()
            .unwrap_or_else(|| entry.accession_number.clone()),
        form_type: record
            .form_type
            .clone()
            .unwrap_or_else(|| entry.form_type.clone()),
        cik: record.cik,
        company_name: record
            .company_name
            .clone()
            .unwrap_or_else(|| entry.company_name.clone()),
        date_filed: record.date_filed.or(entry.date_filed),
        path: entry.path.clone(),
    }
}

fn document_rows(accession_number: &str, record: &FilingRecord) -> Vec<FilingDocument> {
    record
        .documents
        .iter()
        .map(|doc| FilingDocument {
            accession_number: accession_number.to_string(),
            sequence: doc.sequence,
            doc_type: doc.doc_type.clone(),
            file_name: doc.file_name.clone(),
            content_type: doc.content_type.clone(),
            description: doc.description.clone(),
            content_hash: doc.content_hash.clone(),
            start_pos: doc.start_pos as i64,
            end_pos: doc.end_pos as i64,
            is_processed: true,
            is_error: doc.text_failed,
        })
        .collect()
}

/// Tallies from a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub reconciled: usize,
    pub already_ingested: usize,
    pub errored: usize,
    pub documents: usize,
    pub blobs_written: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Reconciled {
                documents,
                blobs_written,
                ..
            } => {
                self.reconciled += 1;
                self.documents += documents;
                self.blobs_written += blobs_written;
            }
            IngestOutcome::AlreadyIngested => self.already_ingested += 1,
            IngestOutcome::Errored { .. } => self.errored += 1,
        }
    }

    fn record_joined(&mut self, joined: Result<IngestOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(outcome) => self.record(&outcome),
            Err(e) => {
                error!(error = %e, "ingestion worker panicked");
                self.errored += 1;
            }
        }
    }
}

/// Ingest every entry with at most `workers` filings in flight.
///
/// Entries are pulled from the iterator only as workers free up, so a large
/// index never materializes one task per row.
pub async fn ingest_entries(
    orchestrator: Arc<Orchestrator>,
    entries: impl IntoIterator<Item = IndexEntry>,
    workers: usize,
) -> BatchSummary {
    let workers = workers.max(1);
    let mut tasks = JoinSet::new();
    let mut summary = BatchSummary::default();

    for entry in entries {
        if tasks.len() >= workers {
            if let Some(joined) = tasks.join_next().await {
                summary.record_joined(joined);
            }
        }
        let orchestrator = Arc::clone(&orchestrator);
        tasks.spawn(async move { orchestrator.ingest(&entry).await }.in_current_span());
    }

    while let Some(joined) = tasks.join_next().await {
        summary.record_joined(joined);
    }
    summary
}

/// `edgar ingest-filing`: ingest a single filing path.
pub async fn run_ingest_filing(config: &Config, entry: IndexEntry) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config).await?;
    let outcome = orchestrator.ingest(&entry).await;

    println!("ingest {}", entry.path);
    match &outcome {
        IngestOutcome::Reconciled {
            accession_number,
            documents,
            blobs_written,
        } => {
            println!("  accession: {}", accession_number);
            println!("  documents: {}", documents);
            println!("  blobs written: {}", blobs_written);
            println!("ok");
        }
        IngestOutcome::AlreadyIngested => {
            println!("  already ingested");
            println!("ok");
        }
        IngestOutcome::Errored { stage, message } => {
            println!("  failed at {}: {}", stage, message);
        }
    }

    orchestrator.catalog().pool().close().await;
    if let IngestOutcome::Errored { stage, message } = outcome {
        bail!("ingestion failed at {}: {}", stage, message);
    }
    Ok(())
}

/// Where `edgar ingest-index` reads its entries from.
pub enum IndexSource {
    Quarter { year: i32, quarter: u8 },
    File(std::path::PathBuf),
}

/// `edgar ingest-index`: ingest every filing of an index.
pub async fn run_ingest_index(
    config: &Config,
    source: IndexSource,
    form_types: &[String],
    limit: Option<usize>,
    workers: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config).await?);

    let (label, entries) = match source {
        IndexSource::Quarter { year, quarter } => (
            format!("{} Q{}", year, quarter),
            index::fetch_master_index(orchestrator.retriever(), year, quarter).await?,
        ),
        IndexSource::File(path) => {
            let body = tokio::fs::read(&path).await?;
            (
                path.display().to_string(),
                index::parse_master_index(&String::from_utf8_lossy(&body)),
            )
        }
    };
    let total = entries.len();

    let filter = if form_types.is_empty() {
        &config.ingest.form_types[..]
    } else {
        form_types
    };
    let mut entries = index::filter_form_types(entries, filter);
    if let Some(lim) = limit {
        entries.truncate(lim);
    }

    if dry_run {
        println!("ingest-index {} (dry-run)", label);
        println!("  index entries: {}", total);
        println!("  selected: {}", entries.len());
        return Ok(());
    }

    let workers = workers.unwrap_or(config.ingest.workers);
    let selected = entries.len();
    info!(index = %label, selected, workers, "starting batch");
    let summary = ingest_entries(Arc::clone(&orchestrator), entries, workers).await;

    println!("ingest-index {}", label);
    println!("  index entries: {}", total);
    println!("  selected: {}", selected);
    println!("  reconciled: {}", summary.reconciled);
    println!("  already ingested: {}", summary.already_ingested);
    println!("  errored: {}", summary.errored);
    println!("  documents: {}", summary.documents);
    println!("  blobs written: {}", summary.blobs_written);
    println!("ok");

    orchestrator.catalog().pool().close().await;
    Ok(())
}
