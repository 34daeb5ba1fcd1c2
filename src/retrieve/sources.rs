//! The four network acquisition strategies, plus the optional Sci-Hub
//! fallback. Every function here fails soft: any non-success status,
//! connection error, or content-type mismatch is logged and degrades to
//! "try the next URL / strategy".

use anyhow::Result;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use serde_json::Value;
use std::fs;
use std::path::Path;
use url::Url;

use crate::bib::{search_query, Entry};
use crate::retrieve::Source;

// Selectors compiled once, like the regex statics in `bib`
static PDF_FRAME_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("iframe#pdf, embed[type='application/pdf']").expect("Invalid frame selector")
});
static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Invalid anchor selector"));

/// Endpoints and credentials for the upstream services. Defaults point at
/// the real services; tests redirect each base at a mock server.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub unpaywall_base: String,
    pub unpaywall_email: String,
    pub arxiv_base: String,
    pub search_base: String,
    /// Sci-Hub base URL. `None` (the default) disables the fallback
    /// entirely; its legal status varies by country.
    pub scihub_base: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            unpaywall_base: "https://api.unpaywall.org/v2".to_string(),
            unpaywall_email: "your-email@example.com".to_string(),
            arxiv_base: "https://arxiv.org/pdf".to_string(),
            search_base: "https://api.semanticscholar.org/graph/v1/paper/search".to_string(),
            scihub_base: None,
        }
    }
}

/// Strategy 1: open-access lookup by DOI, with the optional Sci-Hub
/// viewer-frame scrape as a secondary source.
pub fn by_doi(client: &Client, config: &SourceConfig, entry: &Entry, target: &Path) -> Option<Source> {
    let doi = entry.doi.as_deref()?;

    info!("Trying Unpaywall for DOI: {}", doi);
    match unpaywall_lookup(client, config, doi, target) {
        Ok(true) => return Some(Source::DoiOpenAccess),
        Ok(false) => {}
        Err(e) => warn!("Unpaywall lookup failed for DOI {}: {}", doi, e),
    }

    if let Some(base) = &config.scihub_base {
        info!("Trying Sci-Hub fallback for DOI: {}", doi);
        match scihub_fetch(client, base, doi, target) {
            Ok(true) => return Some(Source::ScrapedUrl),
            Ok(false) => {}
            Err(e) => warn!("Sci-Hub fallback failed for DOI {}: {}", doi, e),
        }
    }

    None
}

fn unpaywall_lookup(client: &Client, config: &SourceConfig, doi: &str, target: &Path) -> Result<bool> {
    let url = format!("{}/{}", config.unpaywall_base.trim_end_matches('/'), doi);
    let response = client
        .get(&url)
        .query(&[("email", config.unpaywall_email.as_str())])
        .send()?;
    if !response.status().is_success() {
        debug!("Unpaywall returned status {} for {}", response.status(), doi);
        return Ok(false);
    }

    let data: Value = response.json()?;
    let Some(location) = data.get("best_oa_location").filter(|l| !l.is_null()) else {
        return Ok(false);
    };
    // Prefer a direct PDF URL, fall back to the landing page
    let oa_url = location
        .get("url_for_pdf")
        .and_then(|v| v.as_str())
        .or_else(|| location.get("url").and_then(|v| v.as_str()));
    match oa_url {
        Some(oa_url) => fetch_pdf(client, oa_url, target),
        None => Ok(false),
    }
}

/// Scrape the embedded viewer frame from a Sci-Hub page to locate the
/// actual PDF URL.
fn scihub_fetch(client: &Client, base: &str, doi: &str, target: &Path) -> Result<bool> {
    let page_url = format!("{}/{}", base.trim_end_matches('/'), doi);
    let response = client.get(&page_url).send()?;
    if !response.status().is_success() {
        debug!("Sci-Hub returned status {} for {}", response.status(), doi);
        return Ok(false);
    }

    let html = response.text()?;
    let document = Html::parse_document(&html);
    let Some(src) = document
        .select(&PDF_FRAME_SELECTOR)
        .find_map(|element| element.value().attr("src"))
    else {
        return Ok(false);
    };

    // Viewer frame URLs are often protocol- or host-relative
    let pdf_url = if src.starts_with("//") {
        format!("https:{}", src)
    } else if src.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), src)
    } else {
        src.to_string()
    };

    fetch_pdf(client, &pdf_url, target)
}

/// Strategy 2: canonical arXiv PDF URL for an extracted identifier.
pub fn by_arxiv(client: &Client, config: &SourceConfig, entry: &Entry, target: &Path) -> Option<Source> {
    let arxiv_id = entry.arxiv_id.as_deref()?;
    let url = format!("{}/{}.pdf", config.arxiv_base.trim_end_matches('/'), arxiv_id);

    info!("Trying arXiv for ID: {}", arxiv_id);
    match fetch_pdf(client, &url, target) {
        Ok(true) => Some(Source::Arxiv),
        Ok(false) => None,
        Err(e) => {
            warn!("arXiv fetch failed for {}: {}", arxiv_id, e);
            None
        }
    }
}

/// Strategy 3: candidate URLs from the entry itself, direct or via
/// landing-page anchor scraping.
pub fn by_url(client: &Client, entry: &Entry, target: &Path) -> Option<Source> {
    for url in &entry.candidate_urls {
        info!("Trying direct URL download: {}", url);

        if url.to_lowercase().ends_with(".pdf") {
            match fetch_pdf(client, url, target) {
                Ok(true) => return Some(Source::DirectUrl),
                Ok(false) => continue,
                Err(e) => {
                    warn!("Direct fetch failed for {}: {}", url, e);
                    continue;
                }
            }
        }

        match fetch_landing_page(client, url, target) {
            Ok(Some(source)) => return Some(source),
            Ok(None) => {}
            Err(e) => warn!("Landing-page fetch failed for {}: {}", url, e),
        }
    }
    None
}

/// Fetch a landing page; accept it directly if it is a PDF by
/// content-type, otherwise scrape its anchors for PDF-looking links and
/// try those in document order.
fn fetch_landing_page(client: &Client, page_url: &str, target: &Path) -> Result<Option<Source>> {
    let response = client.get(page_url).send()?;
    if !response.status().is_success() {
        debug!("GET {} returned status {}", page_url, response.status());
        return Ok(None);
    }

    if content_type_is_pdf(&response) {
        fs::write(target, response.bytes()?)?;
        return Ok(Some(Source::DirectUrl));
    }

    let html = response.text()?;
    let base = Url::parse(page_url)?;
    let document = Html::parse_document(&html);

    let candidates: Vec<String> = document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| {
            let lower = href.to_lowercase();
            lower.ends_with(".pdf")
                || lower.contains("pdf")
                || lower.contains("fulltext")
                || lower.contains("download")
        })
        .filter_map(|href| base.join(href).ok())
        .map(String::from)
        .collect();

    for link in candidates {
        match fetch_pdf(client, &link, target) {
            Ok(true) => {
                info!("Downloaded PDF from extracted link: {}", link);
                return Ok(Some(Source::ScrapedUrl));
            }
            Ok(false) => {}
            Err(e) => warn!("Extracted link {} failed: {}", link, e),
        }
    }

    Ok(None)
}

/// Strategy 4: scholarly-metadata title search; accept the first result
/// exposing an open-access PDF that actually fetches.
pub fn by_title(client: &Client, config: &SourceConfig, entry: &Entry, target: &Path) -> Option<Source> {
    if entry.title.is_empty() {
        return None;
    }
    let query = search_query(&entry.title);

    info!("Searching for title: {}", entry.title);
    match title_search(client, config, &query, target) {
        Ok(true) => Some(Source::TitleSearch),
        Ok(false) => None,
        Err(e) => {
            warn!("Title search failed for '{}': {}", entry.title, e);
            None
        }
    }
}

fn title_search(client: &Client, config: &SourceConfig, query: &str, target: &Path) -> Result<bool> {
    let response = client
        .get(&config.search_base)
        .query(&[("query", query), ("fields", "title,url,openAccessPdf")])
        .send()?;
    if !response.status().is_success() {
        debug!("Title search returned status {}", response.status());
        return Ok(false);
    }

    let data: Value = response.json()?;
    let papers = data
        .get("data")
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();

    for paper in papers {
        let Some(pdf_url) = paper
            .get("openAccessPdf")
            .and_then(|oa| oa.get("url"))
            .and_then(|u| u.as_str())
        else {
            continue;
        };
        match fetch_pdf(client, pdf_url, target) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => warn!("Open-access link {} failed: {}", pdf_url, e),
        }
    }

    Ok(false)
}

/// Download a URL into `target` if and only if it responds successfully
/// with a PDF content type.
pub(crate) fn fetch_pdf(client: &Client, url: &str, target: &Path) -> Result<bool> {
    let response = client.get(url).send()?;
    if !response.status().is_success() {
        debug!("GET {} returned status {}", url, response.status());
        return Ok(false);
    }
    if !content_type_is_pdf(&response) {
        debug!("GET {} did not return a PDF", url);
        return Ok(false);
    }
    fs::write(target, response.bytes()?)?;
    Ok(true)
}

fn content_type_is_pdf(response: &reqwest::blocking::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().starts_with("application/pdf"))
        .unwrap_or(false)
}
