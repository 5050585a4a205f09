//! Plain-text derivation for filing documents.
//!
//! The splitter supplies each document's bytes and detected content type;
//! this module returns markup-stripped UTF-8 text. Failure for one document
//! never affects another; callers record it and move on.

use scraper::{ElementRef, Html, Node, Selector};

use crate::error::ExtractError;

pub const MIME_HTML: &str = "text/html";
pub const MIME_XML: &str = "application/xml";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_UUENCODED: &str = "text/x-uuencode";

/// Extracts plain text from a document body.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_HTML | MIME_XML => Ok(strip_markup(bytes)),
        MIME_TEXT => {
            if is_uuencoded(bytes) {
                return Err(ExtractError::Uuencoded);
            }
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        MIME_UUENCODED => Err(ExtractError::Uuencoded),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

/// Detect a content type from a file name, falling back to sniffing the body.
pub fn detect_content_type(file_name: Option<&str>, body: &[u8]) -> String {
    let by_ext = file_name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    let detected = match by_ext.as_deref() {
        Some("htm" | "html") => Some(MIME_HTML),
        Some("xml" | "xsd" | "xbrl") => Some(MIME_XML),
        Some("txt") => Some(MIME_TEXT),
        Some("pdf") => Some("application/pdf"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("png") => Some("image/png"),
        Some("zip") => Some("application/zip"),
        Some("xls" | "xlsx") => Some("application/vnd.ms-excel"),
        Some("js") => Some("application/javascript"),
        Some("css") => Some("text/css"),
        Some("json") => Some("application/json"),
        _ => None,
    };

    if let Some(ct) = detected {
        return ct.to_string();
    }

    sniff(body).to_string()
}

fn sniff(body: &[u8]) -> &'static str {
    let head_len = body.len().min(512);
    let head = String::from_utf8_lossy(&body[..head_len]).to_ascii_lowercase();
    let head = head.trim_start();

    if is_uuencoded(body) {
        MIME_UUENCODED
    } else if head.starts_with("<html") || head.starts_with("<!doctype html") || head.contains("<body") {
        MIME_HTML
    } else if head.starts_with("<?xml") || head.starts_with("<xbrl") || head.starts_with("<xml") {
        MIME_XML
    } else {
        MIME_TEXT
    }
}

/// uuencoded payloads start with a `begin <mode> <name>` line.
fn is_uuencoded(body: &[u8]) -> bool {
    let head_len = body.len().min(64);
    let head = String::from_utf8_lossy(&body[..head_len]);
    let mut first = head.trim_start().splitn(3, ' ');
    matches!(
        (first.next(), first.next()),
        (Some("begin"), Some(mode)) if !mode.is_empty() && mode.chars().all(|c| c.is_ascii_digit())
    )
}

fn strip_markup(bytes: &[u8]) -> String {
    let html = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&html);

    // Head metadata and script/style bodies are not document text
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next());
    let root = body.unwrap_or_else(|| document.root_element());

    let mut content = String::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| matches!(el.value().name(), "script" | "style"));
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(trimmed);
        }
    }
    content
}
