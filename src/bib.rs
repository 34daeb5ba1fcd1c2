use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

// Commonly used regex patterns compiled once
static BIBTEX_ENTRY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@([a-zA-Z]+)\{([^,]+),").expect("Invalid BibTeX entry regex pattern")
});
static BIBTEX_FIELD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([a-zA-Z]+)\s*=\s*\{([^{}]*((\{[^{}]*\})[^{}]*)*)\}")
        .expect("Invalid BibTeX field regex pattern")
});
// Matches new-style (2104.08653) and old-style (hep-th/9901001) arXiv
// identifiers, with an optional version suffix.
static ARXIV_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]{4}\.[0-9]{4,5}(?:v[0-9]+)?|[a-z][a-z\-]+/[0-9]{7}(?:v[0-9]+)?)")
        .expect("Invalid arXiv ID regex pattern")
});
static ILLEGAL_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[/\\:*?"<>|]"#).expect("Invalid filename char regex pattern")
});

/// Maximum length of a title-derived filename stem.
const MAX_TITLE_LENGTH: usize = 100;

/// Fields that may carry a downloadable URL, checked in this order.
const URL_FIELDS: [&str; 4] = ["url", "link", "pdf", "file"];

/// A raw BibTeX record: entry type, citation key, and its fields.
#[derive(Debug, Clone)]
pub struct BibRecord {
    pub key: String,
    pub entry_type: String,
    pub fields: HashMap<String, String>,
}

impl BibRecord {
    pub fn new(key: String, entry_type: String) -> Self {
        Self {
            key,
            entry_type,
            fields: HashMap::new(),
        }
    }

    pub fn set(&mut self, field: &str, value: String) {
        self.fields.insert(field.to_lowercase(), value);
    }

    pub fn get(&self, field: &str) -> Option<&String> {
        self.fields.get(field)
    }
}

/// A normalized bibliographic entry. Built once per record and never
/// mutated afterwards; its `file_stem` joins the PDF, TEI, and text
/// artifact directories.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<String>,
    pub doi: Option<String>,
    pub arxiv_id: Option<String>,
    pub candidate_urls: Vec<String>,
    pub fields: HashMap<String, String>,
}

impl Entry {
    /// Normalize a raw record into an entry.
    pub fn from_record(record: &BibRecord) -> Self {
        let title = record
            .get("title")
            .map(|t| strip_braces(t).to_string())
            .unwrap_or_default();

        let authors = record
            .get("author")
            .map(|a| {
                strip_braces(a)
                    .split(" and ")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let year = record
            .get("year")
            .map(|y| strip_braces(y).trim().to_string())
            .filter(|y| !y.is_empty());

        let doi = record
            .get("doi")
            .map(|d| strip_braces(d).trim().to_lowercase())
            .filter(|d| !d.is_empty());

        Self {
            id: record.key.clone(),
            arxiv_id: extract_arxiv_id(record),
            candidate_urls: collect_candidate_urls(record),
            title,
            authors,
            year,
            doi,
            fields: record.fields.clone(),
        }
    }

    /// Deterministic filename stem for this entry.
    ///
    /// Derived from the sanitized title, or from a content hash of
    /// id+title+year when the title is empty. The hash guarantee is
    /// probabilistic, not absolute, which is fine for corpora of a few
    /// thousand entries.
    pub fn file_stem(&self) -> String {
        match sanitize_title(&self.title) {
            Some(stem) => stem,
            None => {
                let mut hasher = Sha256::new();
                hasher.update(self.id.as_bytes());
                hasher.update(self.title.as_bytes());
                hasher.update(self.year.as_deref().unwrap_or("").as_bytes());
                let digest = hasher.finalize();
                digest
                    .iter()
                    .take(16)
                    .map(|b| format!("{:02x}", b))
                    .collect()
            }
        }
    }
}

/// Convert a title into a safe filename stem.
///
/// Strips characters illegal in filenames, collapses whitespace, truncates
/// to `MAX_TITLE_LENGTH`, and replaces the remaining spaces with
/// underscores. Returns `None` for an empty title.
pub fn sanitize_title(title: &str) -> Option<String> {
    let replaced = ILLEGAL_FILENAME_CHARS.replace_all(title, " ");
    let collapsed = replaced.split_whitespace().collect::<Vec<&str>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_TITLE_LENGTH).collect();
    let stem = truncated.trim().replace(' ', "_");
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}

/// Clean a title for fuzzy filename matching: punctuation removed,
/// whitespace collapsed, lower-cased.
pub fn clean_title(title: &str) -> String {
    search_query(title).to_lowercase()
}

/// Title reduced to a search query: punctuation removed and whitespace
/// collapsed, original case preserved.
pub fn search_query(title: &str) -> String {
    title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

fn strip_braces(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed)
}

/// Fields scanned for an arXiv identifier after `eprint`, in priority
/// order. Remaining fields are scanned last, by name, so the result never
/// depends on hash-map iteration order.
const ARXIV_SCAN_FIELDS: [&str; 3] = ["journal", "note", "url"];

/// Extract an arXiv identifier from the eprint field or any field whose
/// value mentions arXiv.
fn extract_arxiv_id(record: &BibRecord) -> Option<String> {
    let mut candidates: Vec<&String> = Vec::new();
    if let Some(eprint) = record.get("eprint") {
        candidates.push(eprint);
    }
    for field in ARXIV_SCAN_FIELDS {
        if let Some(value) = record.get(field) {
            if value.to_lowercase().contains("arxiv") {
                candidates.push(value);
            }
        }
    }
    let mut rest: Vec<(&String, &String)> = record
        .fields
        .iter()
        .filter(|(field, value)| {
            field.as_str() != "eprint"
                && !ARXIV_SCAN_FIELDS.contains(&field.as_str())
                && value.to_lowercase().contains("arxiv")
        })
        .collect();
    rest.sort_by(|a, b| a.0.cmp(b.0));
    candidates.extend(rest.into_iter().map(|(_, value)| value));

    for value in candidates {
        let cleaned = value.trim();
        let cleaned = cleaned
            .strip_prefix("arXiv:")
            .or_else(|| cleaned.strip_prefix("arxiv:"))
            .unwrap_or(cleaned);
        if let Some(captures) = ARXIV_ID_REGEX.captures(cleaned) {
            if let Some(id_match) = captures.get(1) {
                return Some(id_match.as_str().to_string());
            }
        }
    }

    None
}

/// Gather every URL-bearing field into an ordered candidate list,
/// discarding anything that is not an HTTP(S) URL.
fn collect_candidate_urls(record: &BibRecord) -> Vec<String> {
    let mut urls = Vec::new();
    for field in URL_FIELDS {
        if let Some(value) = record.get(field) {
            let url = strip_braces(value).trim();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                continue;
            }
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// Parse BibTeX content into raw records.
pub fn parse_bibtex(content: &str) -> Vec<BibRecord> {
    let mut records = Vec::new();

    // Split on '@' so each chunk holds at most one entry
    for chunk in content.split('@').skip(1) {
        let chunk = format!("@{}", chunk);
        let Some(caps) = BIBTEX_ENTRY_REGEX.captures(&chunk) else {
            continue;
        };
        let entry_type = caps[1].to_lowercase();
        if entry_type == "comment" || entry_type == "preamble" || entry_type == "string" {
            continue;
        }
        let key = caps[2].trim().to_string();
        if key.is_empty() {
            continue;
        }

        let mut record = BibRecord::new(key, entry_type);
        for cap in BIBTEX_FIELD_REGEX.captures_iter(&chunk) {
            if let (Some(field), Some(value)) = (cap.get(1), cap.get(2)) {
                record.set(field.as_str(), value.as_str().to_string());
            }
        }
        records.push(record);
    }

    records
}

/// Load a BibTeX file and normalize every record, in file order.
pub fn load_entries(path: &Path) -> Result<Vec<Entry>> {
    let content = fs::read_to_string(path)?;
    let entries = parse_bibtex(&content)
        .iter()
        .map(Entry::from_record)
        .collect();
    Ok(entries)
}
