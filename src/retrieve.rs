pub mod cache;
pub mod sources;

use anyhow::Result;
use log::{info, warn};
use reqwest::blocking::Client;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bib::Entry;
use sources::SourceConfig;

/// Browser-like User-Agent; some publisher endpoints block unidentified
/// clients outright.
pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a PDF ultimately came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    LocalCache,
    DoiOpenAccess,
    Arxiv,
    DirectUrl,
    ScrapedUrl,
    TitleSearch,
    None,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::LocalCache => "local-cache",
            Source::DoiOpenAccess => "doi-open-access",
            Source::Arxiv => "arxiv",
            Source::DirectUrl => "direct-url",
            Source::ScrapedUrl => "scraped-url",
            Source::TitleSearch => "title-search",
            Source::None => "none",
        };
        f.write_str(name)
    }
}

/// Result of one entry's trip through the cache and strategy chain.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub source_used: Source,
    /// Present iff retrieval succeeded.
    pub pdf_path: Option<PathBuf>,
    /// Strategies tried, in order, for diagnostics.
    pub attempted: Vec<Source>,
}

impl RetrievalOutcome {
    pub fn succeeded(&self) -> bool {
        self.pdf_path.is_some()
    }
}

/// Run ordered attempts until one produces a value.
///
/// Both fallback sites in this module — the cache heuristics and the
/// network strategy chain — are instances of this one construct.
pub(crate) fn first_hit<L: Copy, T>(
    labels: impl IntoIterator<Item = L>,
    mut run: impl FnMut(L) -> Option<T>,
) -> Option<T> {
    labels.into_iter().find_map(|label| run(label))
}

/// Drives cache lookup and the fixed strategy chain per entry.
#[derive(Debug)]
pub struct Retriever {
    client: Client,
    config: SourceConfig,
    pdf_dir: PathBuf,
    zotero_dir: Option<PathBuf>,
}

impl Retriever {
    pub fn new(
        pdf_dir: PathBuf,
        zotero_dir: Option<PathBuf>,
        config: SourceConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            config,
            pdf_dir,
            zotero_dir,
        })
    }

    /// Target PDF path for an entry, the primary key shared by all three
    /// artifact directories.
    pub fn target_path(&self, entry: &Entry) -> PathBuf {
        self.pdf_dir.join(format!("{}.pdf", entry.file_stem()))
    }

    /// Resolve one entry: local cache first, then the strategy chain in
    /// fixed order, short-circuiting on the first success. Exhausting the
    /// chain is reported, never raised.
    pub fn retrieve(&self, entry: &Entry) -> RetrievalOutcome {
        let target = self.target_path(entry);

        // Cache hits perform zero network I/O and leave `attempted` empty.
        if let Some(source) = cache::resolve(entry, &target, self.zotero_dir.as_deref()) {
            return RetrievalOutcome {
                source_used: source,
                pdf_path: Some(target),
                attempted: Vec::new(),
            };
        }

        let mut attempted = Vec::new();
        let chain = [
            Source::DoiOpenAccess,
            Source::Arxiv,
            Source::DirectUrl,
            Source::TitleSearch,
        ];
        let hit = first_hit(chain, |strategy| {
            attempted.push(strategy);
            match strategy {
                Source::DoiOpenAccess => {
                    sources::by_doi(&self.client, &self.config, entry, &target)
                }
                Source::Arxiv => sources::by_arxiv(&self.client, &self.config, entry, &target),
                Source::DirectUrl => sources::by_url(&self.client, entry, &target),
                Source::TitleSearch => {
                    sources::by_title(&self.client, &self.config, entry, &target)
                }
                _ => None,
            }
        });

        match hit {
            Some(source) => RetrievalOutcome {
                source_used: source,
                pdf_path: Some(target),
                attempted,
            },
            None => RetrievalOutcome {
                source_used: Source::None,
                pdf_path: None,
                attempted,
            },
        }
    }

    /// Retrieve PDFs for every entry, in input order.
    pub fn retrieve_all(&self, entries: &[Entry]) -> Vec<RetrievalOutcome> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = self.retrieve(entry);
            match outcome.source_used {
                Source::None => {
                    warn!("Could not retrieve PDF for '{}'", display_title(entry));
                }
                source => {
                    info!("Retrieved PDF for '{}' via {}", display_title(entry), source);
                }
            }
            outcomes.push(outcome);
        }
        let retrieved = outcomes.iter().filter(|o| o.succeeded()).count();
        info!("Retrieved {} PDFs out of {} entries", retrieved, entries.len());
        outcomes
    }
}

fn display_title(entry: &Entry) -> &str {
    if entry.title.is_empty() {
        &entry.id
    } else {
        &entry.title
    }
}
