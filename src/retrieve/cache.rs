//! Local PDF resolution before any network activity.
//!
//! Checks the output directory for an already-downloaded PDF, then probes
//! an external reference-manager (Zotero) storage tree by filename
//! heuristics. Misses are not errors; they fall through to the network
//! strategy chain.

use log::{info, warn};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::bib::{clean_title, Entry};
use crate::retrieve::{first_hit, Source};

#[derive(Debug, Clone, Copy)]
enum Heuristic {
    Doi,
    TitlePrefix,
}

/// Resolve an entry against local storage. Returns the cache source on a
/// hit, with the PDF already in place at `target`.
pub fn resolve(entry: &Entry, target: &Path, zotero_dir: Option<&Path>) -> Option<Source> {
    if target.exists() {
        info!("PDF already exists for '{}'", entry.title);
        return Some(Source::LocalCache);
    }

    let tree = zotero_dir?;
    if !tree.is_dir() {
        return None;
    }

    first_hit([Heuristic::Doi, Heuristic::TitlePrefix], |heuristic| {
        let found = match heuristic {
            Heuristic::Doi => find_by_doi(entry, tree),
            Heuristic::TitlePrefix => find_by_title_prefix(entry, tree),
        }?;
        // Copy, never move: the reference-manager tree is not ours.
        match fs::copy(&found, target) {
            Ok(_) => {
                info!("Found PDF in local storage: {}", found.display());
                Some(Source::LocalCache)
            }
            Err(e) => {
                warn!("Failed to copy {} to {}: {}", found.display(), target.display(), e);
                None
            }
        }
    })
}

/// Exact case-insensitive DOI substring match against PDF filenames.
fn find_by_doi(entry: &Entry, tree: &Path) -> Option<std::path::PathBuf> {
    let doi = entry.doi.as_deref()?;
    pdf_files(tree).find(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase().contains(doi))
            .unwrap_or(false)
    })
}

/// Prefix of the cleaned, lower-cased title (first three words) matched
/// against filenames. Only attempted when the prefix is at least 10
/// characters, to avoid false positives on short or generic titles.
fn find_by_title_prefix(entry: &Entry, tree: &Path) -> Option<std::path::PathBuf> {
    let cleaned = clean_title(&entry.title);
    let prefix = cleaned
        .split_whitespace()
        .take(3)
        .collect::<Vec<&str>>()
        .join(" ");
    if prefix.len() < 10 {
        return None;
    }
    pdf_files(tree).find(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_lowercase().contains(&prefix))
            .unwrap_or(false)
    })
}

fn pdf_files(tree: &Path) -> impl Iterator<Item = std::path::PathBuf> {
    WalkDir::new(tree)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry.path().is_file()
                && entry
                    .path()
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.path().to_path_buf())
}
