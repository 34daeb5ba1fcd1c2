//! Sequences retrieval and extraction over the full entry set.

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::bib::{self, Entry};
use crate::error::HarvestError;
use crate::extract::GrobidClient;
use crate::retrieve::{RetrievalOutcome, Retriever};
use crate::retrieve::sources::SourceConfig;
use crate::tei;

/// Default delay after each GROBID call, to respect its rate limits.
pub const DEFAULT_GROBID_DELAY: Duration = Duration::from_secs(1);

/// Aggregated counts for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub total: usize,
    pub retrieved: usize,
    pub processed: usize,
}

impl PipelineSummary {
    /// True iff at least one document made it through both phases.
    pub fn succeeded(&self) -> bool {
        self.processed > 0
    }
}

/// The full acquisition-and-extraction pipeline.
#[derive(Debug)]
pub struct Pipeline {
    entries: Vec<Entry>,
    retriever: Retriever,
    grobid: GrobidClient,
    tei_dir: PathBuf,
    txt_dir: PathBuf,
    grobid_delay: Duration,
}

impl Pipeline {
    /// Load entries from a BibTeX file and set up the three artifact
    /// directories under `output_dir`.
    pub fn new(
        bib_path: &Path,
        output_dir: &Path,
        grobid_url: &str,
        zotero_dir: Option<PathBuf>,
        config: SourceConfig,
        grobid_delay: Duration,
    ) -> Result<Self> {
        let entries = bib::load_entries(bib_path)
            .with_context(|| format!("Failed to load BibTeX file {}", bib_path.display()))?;
        if entries.is_empty() {
            return Err(HarvestError::NoEntries {
                path: bib_path.display().to_string(),
            }
            .into());
        }
        info!("Loaded {} entries from BibTeX", entries.len());

        let pdf_dir = output_dir.join("pdfs");
        let tei_dir = output_dir.join("tei");
        let txt_dir = output_dir.join("text");
        for dir in [&pdf_dir, &tei_dir, &txt_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }

        Ok(Self {
            entries,
            retriever: Retriever::new(pdf_dir, zotero_dir, config)?,
            grobid: GrobidClient::new(grobid_url)?,
            tei_dir,
            txt_dir,
            grobid_delay,
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Phase 1: retrieve a PDF for every entry, in input order.
    pub fn retrieve_pdfs(&self) -> Vec<RetrievalOutcome> {
        self.retriever.retrieve_all(&self.entries)
    }

    /// Phase 2: run GROBID over the PDFs retrieved in phase 1 and write
    /// the TEI and normalized-text artifacts. Entries whose retrieval
    /// failed are never extracted.
    ///
    /// Fails fast with [`HarvestError::ServiceUnavailable`] when the
    /// liveness probe does not answer; per-document failures are soft.
    pub fn process_with_grobid(&self, outcomes: &[RetrievalOutcome]) -> Result<usize> {
        self.grobid.ensure_alive()?;

        let mut success_count = 0;
        for (entry, outcome) in self.entries.iter().zip(outcomes) {
            let Some(pdf_path) = outcome.pdf_path.as_deref() else {
                continue;
            };

            let stem = entry.file_stem();
            let tei_path = self.tei_dir.join(format!("{}.tei.xml", stem));
            let txt_path = self.txt_dir.join(format!("{}.txt", stem));

            // Idempotent re-run: no request, no delay
            if tei_path.exists() && txt_path.exists() {
                info!("Already processed {}", stem);
                success_count += 1;
                continue;
            }

            match self.process_document(pdf_path, &tei_path, &txt_path) {
                Ok(()) => success_count += 1,
                Err(e) => error!("Error processing {}: {}", pdf_path.display(), e),
            }

            thread::sleep(self.grobid_delay);
        }

        info!("Processed {} PDFs with GROBID", success_count);
        Ok(success_count)
    }

    fn process_document(&self, pdf_path: &Path, tei_path: &Path, txt_path: &Path) -> Result<()> {
        if !tei_path.exists() {
            let xml = self.grobid.process_fulltext(pdf_path)?;
            fs::write(tei_path, xml)?;
        }

        if !txt_path.exists() {
            let xml = fs::read_to_string(tei_path)?;
            // Extraction failures persist an error-marker document so the
            // batch keeps going
            fs::write(txt_path, tei::build_text(&xml))?;
        }

        Ok(())
    }

    /// Run both phases. The only error that propagates is the fatal
    /// extraction-service outage; everything else is reflected in the
    /// summary counts.
    pub fn run(&self) -> Result<PipelineSummary> {
        info!("Step 1: retrieving PDFs");
        let outcomes = self.retrieve_pdfs();
        let retrieved = outcomes.iter().filter(|o| o.succeeded()).count();

        let mut summary = PipelineSummary {
            total: self.entries.len(),
            retrieved,
            processed: 0,
        };

        if retrieved == 0 {
            warn!("No PDFs retrieved, skipping extraction phase");
            return Ok(summary);
        }

        info!("Step 2: processing PDFs with GROBID");
        summary.processed = self.process_with_grobid(&outcomes)?;

        info!(
            "Pipeline completed: {}/{} retrieved, {}/{} processed",
            summary.retrieved, summary.total, summary.processed, summary.retrieved
        );
        Ok(summary)
    }
}
