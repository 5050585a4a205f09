//! Directory-listing discovery.
//!
//! Archive directory pages wrap their file table in an element with id
//! `main-content`. [`list_path`] fetches such a page and returns the child
//! paths it links to, normalized against the listing path.

use scraper::{Html, Selector};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ListingError;
use crate::retriever::Retriever;

const PARENT_DIRECTORY: &str = "Parent Directory";

/// List a remote directory.
///
/// Returns an empty list when nothing could be retrieved (retry miss or an
/// empty body), and [`ListingError::MissingContainer`] when the page is
/// present but not shaped like a listing.
pub async fn list_path(retriever: &Retriever, path: &str) -> Result<Vec<String>, ListingError> {
    info!(path, "retrieving directory listing");

    let Some(fetched) = retriever.fetch(path).await? else {
        warn!(path, "listing retrieval produced no buffer");
        return Ok(Vec::new());
    };

    let links = parse_listing(path, &fetched.bytes)?;
    info!(path, count = links.len(), "retrieved listing links");
    Ok(links)
}

/// `edgar list`: print the child paths of a remote directory.
pub async fn run_list(config: &Config, path: &str) -> anyhow::Result<()> {
    let retriever = Retriever::from_config(&config.http)?;
    let links = list_path(&retriever, path).await?;
    for link in &links {
        println!("{}", link);
    }
    println!("{} entries", links.len());
    Ok(())
}

/// Parse a listing page body into normalized child paths.
pub fn parse_listing(path: &str, body: &[u8]) -> Result<Vec<String>, ListingError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }

    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);

    let container_sel = Selector::parse("#main-content").expect("static selector");
    let anchor_sel = Selector::parse("a[href]").expect("static selector");

    let Some(container) = document.select(&container_sel).next() else {
        error!(path, "unable to find main-content container");
        return Err(ListingError::MissingContainer(path.to_string()));
    };

    let links = container
        .select(&anchor_sel)
        .filter(|a| !a.text().collect::<String>().contains(PARENT_DIRECTORY))
        .filter_map(|a| a.value().attr("href"))
        .map(|href| normalize_href(path, href))
        .collect();

    Ok(links)
}

/// Absolute-rooted hrefs pass through; relative ones are joined onto `path`.
pub fn normalize_href(path: &str, href: &str) -> String {
    if href.starts_with('/') {
        href.to_string()
    } else {
        format!(
            "{}/{}",
            path.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}
