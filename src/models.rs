//! Core data models used throughout the ingestion pipeline.
//!
//! Parsed types ([`FilingRecord`], [`DocumentDescriptor`]) come out of the
//! splitter; row types ([`Company`], [`Filing`]) mirror the catalog tables.

use chrono::NaiveDate;
use serde::Serialize;

/// One row of an index feed: a filing that should be ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub accession_number: String,
    pub form_type: String,
    pub cik: i64,
    pub company_name: String,
    pub date_filed: Option<NaiveDate>,
    /// Archive-relative path, e.g. `edgar/data/100/0000912057-24-000001.txt`.
    pub path: String,
}

/// Descriptive snapshot of a registrant taken from a filing header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompanyProfile {
    pub sic: Option<String>,
    pub sic_description: Option<String>,
    pub irs_number: Option<String>,
    pub state_of_incorporation: Option<String>,
    pub state_location: Option<String>,
    pub fiscal_year_end: Option<String>,
    pub phone: Option<String>,
}

/// Result of splitting a composite filing.
#[derive(Debug, Clone)]
pub struct FilingRecord {
    pub cik: i64,
    pub company_name: Option<String>,
    pub form_type: Option<String>,
    pub accession_number: Option<String>,
    pub date_filed: Option<NaiveDate>,
    /// `PUBLIC DOCUMENT COUNT` from the header, when present.
    pub declared_document_count: Option<i64>,
    pub profile: CompanyProfile,
    pub documents: Vec<DocumentDescriptor>,
}

impl FilingRecord {
    /// Number of documents actually found in the body.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }
}

/// A byte-addressed sub-document of a filing.
#[derive(Debug, Clone)]
pub struct DocumentDescriptor {
    pub doc_type: Option<String>,
    pub sequence: i64,
    pub file_name: Option<String>,
    pub content_type: String,
    pub description: Option<String>,
    pub start_pos: usize,
    pub end_pos: usize,
    /// Hex SHA-256 of `raw[start_pos..end_pos]`.
    pub content_hash: String,
    /// Plain-text rendering, when requested and derivable.
    pub text: Option<String>,
    /// Set when text was requested but could not be derived.
    pub text_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    pub cik: i64,
    pub name: String,
    pub name_as_of: Option<NaiveDate>,
}

/// Filing row as stored in the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct Filing {
    pub accession_number: String,
    pub cik: i64,
    pub form_type: Option<String>,
    pub date_filed: Option<NaiveDate>,
    pub content_hash: Option<String>,
    pub path: String,
    pub document_count: i64,
    pub processed_document_count: i64,
    pub is_processed: bool,
    pub is_error: bool,
    pub error_message: Option<String>,
    pub date_downloaded: NaiveDate,
}

/// Values for a Filing row that is about to be processed.
#[derive(Debug, Clone)]
pub struct NewFiling {
    pub accession_number: String,
    pub cik: i64,
    pub form_type: Option<String>,
    pub date_filed: Option<NaiveDate>,
    pub content_hash: Option<String>,
    pub path: String,
    pub document_count: i64,
}

/// Filing document row as stored in the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct FilingDocument {
    pub accession_number: String,
    pub sequence: i64,
    pub doc_type: Option<String>,
    pub file_name: Option<String>,
    pub content_type: String,
    pub description: Option<String>,
    pub content_hash: String,
    pub start_pos: i64,
    pub end_pos: i64,
    pub is_processed: bool,
    pub is_error: bool,
}
