use anyhow::Result;
use clap::Parser;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

use bibharvest::pipeline::Pipeline;
use bibharvest::retrieve::sources::SourceConfig;

/// CLI app for retrieving PDFs for BibTeX entries and extracting
/// structured text with GROBID
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the BibTeX file
    bib_path: PathBuf,
    /// Directory for the pdfs/, tei/, and text/ artifact directories
    output_dir: PathBuf,
    /// URL of the GROBID service
    #[arg(long, default_value = "http://localhost:8070")]
    grobid_url: String,
    /// Zotero storage directory to probe for already-downloaded PDFs
    /// (defaults to ~/Zotero/storage when it exists)
    #[arg(long)]
    zotero_dir: Option<PathBuf>,
    /// Contact email sent to the Unpaywall API
    #[arg(long)]
    email: Option<String>,
    /// Enable the Sci-Hub fallback (disabled by default; legal status
    /// varies by country)
    #[arg(long)]
    enable_scihub: bool,
    /// Delay between GROBID requests, in milliseconds
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut config = SourceConfig::default();
    if let Some(email) = args.email {
        config.unpaywall_email = email;
    }
    if args.enable_scihub {
        config.scihub_base = Some("https://sci-hub.se".to_string());
    }

    let zotero_dir = args.zotero_dir.or_else(default_zotero_dir);

    let pipeline = Pipeline::new(
        &args.bib_path,
        &args.output_dir,
        &args.grobid_url,
        zotero_dir,
        config,
        Duration::from_millis(args.delay_ms),
    )?;

    let summary = pipeline.run()?;
    if !summary.succeeded() {
        warn!("No documents were fully processed");
    }

    Ok(())
}

fn default_zotero_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let dir = PathBuf::from(home).join("Zotero").join("storage");
    if dir.is_dir() {
        Some(dir)
    } else {
        None
    }
}
