//! Composite filing splitter.
//!
//! A full submission is an SGML-ish text stream: a header of `KEY: value`
//! lines followed by `<DOCUMENT>` blocks, each carrying `<TYPE>`,
//! `<SEQUENCE>`, `<FILENAME>`, `<DESCRIPTION>` tag lines and a `<TEXT>` body.
//!
//! ```text
//! <SEC-HEADER>
//! ACCESSION NUMBER:		0000912057-24-000001
//! CONFORMED SUBMISSION TYPE:	10-K
//! ...
//! </SEC-HEADER>
//! <DOCUMENT>
//! <TYPE>10-K
//! <SEQUENCE>1
//! <FILENAME>a10-k.htm
//! <TEXT>
//! ...body bytes...
//! </TEXT>
//! </DOCUMENT>
//! ```
//!
//! [`split_filing`] returns the header metadata plus one
//! [`DocumentDescriptor`] per block, addressed by byte offsets into the
//! original buffer and hashed with SHA-256.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use crate::error::SplitError;
use crate::extract;
use crate::models::{CompanyProfile, DocumentDescriptor, FilingRecord};

/// Sequence number assigned to the first document of a filing.
pub const SEQUENCE_BASE: i64 = 1;

const DOCUMENT_OPEN: &[u8] = b"<DOCUMENT>";
const DOCUMENT_CLOSE: &[u8] = b"</DOCUMENT>";
const TEXT_OPEN: &[u8] = b"<TEXT>";
const TEXT_CLOSE: &[u8] = b"</TEXT>";

/// Split a raw composite filing into header metadata and documents.
///
/// Fails only when the registrant identifier cannot be recovered; every
/// other missing field is left as `None`.
pub fn split_filing(raw: &[u8], extract_text: bool) -> Result<FilingRecord, SplitError> {
    let header_end = find_bytes(raw, DOCUMENT_OPEN, 0).unwrap_or(raw.len());
    let header = parse_header(&raw[..header_end]);

    let cik = header
        .get("CENTRAL INDEX KEY")
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or(SplitError::MissingCik)?;

    let date_filed = header
        .get("FILED AS OF DATE")
        .and_then(|v| NaiveDate::parse_from_str(v, "%Y%m%d").ok());

    let declared_document_count = header
        .get("PUBLIC DOCUMENT COUNT")
        .and_then(|v| v.parse::<i64>().ok());

    let (sic_description, sic) = match header.get("STANDARD INDUSTRIAL CLASSIFICATION") {
        Some(v) => split_sic(v),
        None => (None, None),
    };

    let profile = CompanyProfile {
        sic,
        sic_description,
        irs_number: header.get("IRS NUMBER").cloned(),
        state_of_incorporation: header.get("STATE OF INCORPORATION").cloned(),
        state_location: header.get("STATE").cloned(),
        fiscal_year_end: header.get("FISCAL YEAR END").cloned(),
        phone: header.get("BUSINESS PHONE").cloned(),
    };

    let documents = split_documents(raw, header_end, extract_text);

    Ok(FilingRecord {
        cik,
        company_name: header.get("COMPANY CONFORMED NAME").cloned(),
        form_type: header.get("CONFORMED SUBMISSION TYPE").cloned(),
        accession_number: header.get("ACCESSION NUMBER").cloned(),
        date_filed,
        declared_document_count,
        profile,
        documents,
    })
}

/// Parse `KEY: value` header lines. The first occurrence of a key wins.
fn parse_header(header: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(header);
    let mut fields = HashMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('<') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        fields
            .entry(key.trim().to_ascii_uppercase())
            .or_insert_with(|| value.to_string());
    }

    fields
}

/// `SERVICES-PREPACKAGED SOFTWARE [7372]` → (description, code).
fn split_sic(value: &str) -> (Option<String>, Option<String>) {
    match (value.rfind('['), value.rfind(']')) {
        (Some(open), Some(close)) if open < close => {
            let code = value[open + 1..close].trim();
            let desc = value[..open].trim();
            (
                (!desc.is_empty()).then(|| desc.to_string()),
                (!code.is_empty()).then(|| code.to_string()),
            )
        }
        _ => (Some(value.to_string()), None),
    }
}

fn split_documents(raw: &[u8], from: usize, extract_text: bool) -> Vec<DocumentDescriptor> {
    let mut documents = Vec::new();
    let mut cursor = from;
    let mut sequence = SEQUENCE_BASE;

    while let Some(open) = find_bytes(raw, DOCUMENT_OPEN, cursor) {
        let block_start = open + DOCUMENT_OPEN.len();
        let (block_end, next_cursor) = match find_bytes(raw, DOCUMENT_CLOSE, block_start) {
            Some(close) => (close, close + DOCUMENT_CLOSE.len()),
            None => (raw.len(), raw.len()),
        };

        documents.push(describe_document(
            raw,
            open,
            block_start,
            block_end,
            next_cursor,
            sequence,
            extract_text,
        ));

        sequence += 1;
        cursor = next_cursor;
    }

    documents
}

fn describe_document(
    raw: &[u8],
    open: usize,
    block_start: usize,
    block_end: usize,
    block_outer_end: usize,
    sequence: i64,
    extract_text: bool,
) -> DocumentDescriptor {
    let block = &raw[block_start..block_end];
    let text_open = find_bytes(block, TEXT_OPEN, 0);
    let tag_region = &block[..text_open.unwrap_or(block.len())];
    let tags = parse_tags(tag_region);

    let (mut start, mut end) = match text_open {
        Some(t) => {
            let mut body_start = t + TEXT_OPEN.len();
            if block[body_start..].starts_with(b"\r\n") {
                body_start += 2;
            } else if block[body_start..].starts_with(b"\n") {
                body_start += 1;
            }
            let body_end = find_bytes(block, TEXT_CLOSE, body_start).unwrap_or(block.len());
            (block_start + body_start, block_start + body_end)
        }
        None => (block_start, block_end),
    };

    // An empty body still needs a non-empty, in-bounds range.
    if start >= end {
        start = open;
        end = block_outer_end;
    }

    let body = &raw[start..end];
    let file_name = tags.get("FILENAME").cloned();
    let content_type = extract::detect_content_type(file_name.as_deref(), body);

    let (text, text_failed) = if extract_text {
        match extract::extract_text(body, &content_type) {
            Ok(t) => (Some(t), false),
            Err(e) => {
                debug!(sequence, error = %e, "no text derived for document");
                (None, true)
            }
        }
    } else {
        (None, false)
    };

    DocumentDescriptor {
        doc_type: tags.get("TYPE").cloned(),
        sequence,
        file_name,
        content_type,
        description: tags.get("DESCRIPTION").cloned(),
        start_pos: start,
        end_pos: end,
        content_hash: sha256_hex(body),
        text,
        text_failed,
    }
}

/// Parse `<TAG>value` lines preceding a document body.
fn parse_tags(region: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(region);
    let mut tags = HashMap::new();

    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('<') else {
            continue;
        };
        let Some((tag, value)) = rest.split_once('>') else {
            continue;
        };
        let value = value.trim();
        if tag.starts_with('/') || value.is_empty() {
            continue;
        }
        tags.entry(tag.to_ascii_uppercase())
            .or_insert_with(|| value.to_string());
    }

    tags
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
