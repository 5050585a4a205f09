//! Quarterly index feeds.
//!
//! The archive publishes a pipe-delimited `master.idx` per quarter:
//!
//! ```text
//! Description:           Master Index of EDGAR Dissemination Feed
//! ...
//! CIK|Company Name|Form Type|Date Filed|Filename
//! --------------------------------------------------------------------------------
//! 1000045|NICHOLAS FINANCIAL INC|10-Q|2024-02-14|edgar/data/1000045/0000950170-24-014566.txt
//! ```
//!
//! Rows become [`IndexEntry`] values with archive-relative paths, which is
//! what the orchestrator consumes.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::path::Path;
use tracing::{info, warn};

use crate::models::IndexEntry;
use crate::retriever::Retriever;

/// Remote path of the master index for a quarter.
pub fn master_index_path(year: i32, quarter: u8) -> String {
    format!("/Archives/edgar/full-index/{}/QTR{}/master.idx", year, quarter)
}

/// Fetch and parse one quarter's master index.
pub async fn fetch_master_index(
    retriever: &Retriever,
    year: i32,
    quarter: u8,
) -> Result<Vec<IndexEntry>> {
    if !(1..=4).contains(&quarter) {
        bail!("quarter must be between 1 and 4, got {}", quarter);
    }

    let path = master_index_path(year, quarter);
    let Some(fetched) = retriever.fetch(&path).await? else {
        bail!("Unable to retrieve master index: {}", path);
    };

    let entries = parse_master_index(&String::from_utf8_lossy(&fetched.bytes));
    info!(year, quarter, entries = entries.len(), "parsed master index");
    Ok(entries)
}

/// Parse a `master.idx` body. Rows that do not have five fields or a
/// numeric CIK are skipped.
pub fn parse_master_index(body: &str) -> Vec<IndexEntry> {
    let mut lines = body.lines();
    // Rows start after the dashed separator under the column header
    if !lines.by_ref().any(|l| {
        let l = l.trim();
        !l.is_empty() && l.chars().all(|c| c == '-')
    }) {
        return Vec::new();
    }

    let mut entries = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_row(line) {
            Some(entry) => entries.push(entry),
            None => warn!(line, "skipping malformed index row"),
        }
    }
    entries
}

fn parse_row(line: &str) -> Option<IndexEntry> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let [cik, company_name, form_type, date_filed, file_name] = fields.as_slice() else {
        return None;
    };

    let cik = cik.parse::<i64>().ok()?;
    let path = archive_path(file_name);
    let accession_number = accession_from_path(&path)?;

    Some(IndexEntry {
        accession_number,
        form_type: form_type.to_string(),
        cik,
        company_name: company_name.to_string(),
        date_filed: parse_index_date(date_filed),
        path,
    })
}

fn parse_index_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y%m%d"))
        .ok()
}

/// Normalize any archive reference to the archive-relative form
/// `edgar/data/<cik>/<file>`.
///
/// Accepts `/Archives/edgar/data/...`, `edgar/data/...` and the bare
/// `data/...` form found in older indexes.
pub fn archive_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('/');
    let trimmed = trimmed.strip_prefix("Archives/").unwrap_or(trimmed);
    if trimmed.starts_with("data/") {
        format!("edgar/{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// The accession number is the file stem of the filing path.
pub fn accession_from_path(path: &str) -> Option<String> {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
}

/// Build an entry from a bare filing path (`edgar/data/<cik>/<accession>.txt`).
///
/// Company name, form type and date are unknown until the filing is parsed.
pub fn entry_from_path(path: &str) -> Option<IndexEntry> {
    let path = archive_path(path);
    let mut parts = path.split('/');
    let cik = match (parts.next(), parts.next(), parts.next()) {
        (Some("edgar"), Some("data"), Some(cik)) => cik.parse::<i64>().ok()?,
        _ => return None,
    };
    let accession_number = accession_from_path(&path)?;

    Some(IndexEntry {
        accession_number,
        form_type: String::new(),
        cik,
        company_name: String::new(),
        date_filed: None,
        path,
    })
}

/// Keep entries whose form type is in `form_types`. An empty filter keeps
/// everything.
pub fn filter_form_types(entries: Vec<IndexEntry>, form_types: &[String]) -> Vec<IndexEntry> {
    if form_types.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|e| form_types.iter().any(|f| f.eq_ignore_ascii_case(&e.form_type)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "\
Description:           Master Index of EDGAR Dissemination Feed
Last Data Received:    March 31, 2024
Comments:              webmaster@sec.gov
Anonymous FTP:         ftp://ftp.sec.gov/edgar/




CIK|Company Name|Form Type|Date Filed|Filename
--------------------------------------------------------------------------------
1000045|NICHOLAS FINANCIAL INC|10-Q|2024-02-14|edgar/data/1000045/0000950170-24-014566.txt
1000097|KINGDON CAPITAL MANAGEMENT, L.L.C.|SC 13G/A|2024-02-14|data/1000097/0001000097-24-000002.txt
not-a-cik|BROKEN|10-K|2024-01-01|edgar/data/x/y.txt
1000177|NORDIC AMERICAN TANKERS Ltd|6-K|2024-01-03
";

    #[test]
    fn test_parse_rows_after_separator() {
        let entries = parse_master_index(MASTER);
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.cik, 1000045);
        assert_eq!(first.company_name, "NICHOLAS FINANCIAL INC");
        assert_eq!(first.form_type, "10-Q");
        assert_eq!(first.date_filed, NaiveDate::from_ymd_opt(2024, 2, 14));
        assert_eq!(first.accession_number, "0000950170-24-014566");
        assert_eq!(
            first.path,
            "edgar/data/1000045/0000950170-24-014566.txt"
        );
    }

    #[test]
    fn test_bare_data_paths_are_normalized() {
        let entries = parse_master_index(MASTER);
        assert_eq!(entries[1].path, "edgar/data/1000097/0001000097-24-000002.txt");
        assert_eq!(entries[1].accession_number, "0001000097-24-000002");
    }

    #[test]
    fn test_no_separator_means_no_rows() {
        assert!(parse_master_index("CIK|Company Name\n1|A|B|2024-01-01|x.txt\n").is_empty());
    }

    #[test]
    fn test_archive_path_forms() {
        assert_eq!(
            archive_path("/Archives/edgar/data/100/a.txt"),
            "edgar/data/100/a.txt"
        );
        assert_eq!(archive_path("edgar/data/100/a.txt"), "edgar/data/100/a.txt");
        assert_eq!(archive_path("data/100/a.txt"), "edgar/data/100/a.txt");
    }

    #[test]
    fn test_entry_from_path() {
        let entry = entry_from_path("/Archives/edgar/data/320193/0000320193-24-000006.txt").unwrap();
        assert_eq!(entry.cik, 320193);
        assert_eq!(entry.accession_number, "0000320193-24-000006");
        assert!(entry.company_name.is_empty());

        assert!(entry_from_path("edgar/full-index/2024/QTR1/master.idx").is_none());
    }

    #[test]
    fn test_form_type_filter() {
        let entries = parse_master_index(MASTER);
        let kept = filter_form_types(entries.clone(), &["10-q".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].cik, 1000045);

        assert_eq!(filter_form_types(entries, &[]).len(), 2);
    }

    #[test]
    fn test_master_index_path() {
        assert_eq!(
            master_index_path(2024, 1),
            "/Archives/edgar/full-index/2024/QTR1/master.idx"
        );
    }
}
