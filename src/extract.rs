//! GROBID full-text extraction client.

use anyhow::Result;
use log::{debug, info};
use reqwest::blocking::{multipart, Client};
use std::path::Path;
use std::time::Duration;

use crate::error::HarvestError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Client for the GROBID document-structuring service.
#[derive(Debug)]
pub struct GrobidClient {
    client: Client,
    base_url: String,
}

impl GrobidClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Liveness probe. A dead service is a hard dependency outage: the
    /// whole extraction phase must stop rather than retry per document.
    pub fn is_alive(&self) -> bool {
        let url = format!("{}/api/isalive", self.base_url);
        match self.client.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("GROBID liveness probe failed: {}", e);
                false
            }
        }
    }

    /// Ensure the service answers its liveness probe.
    pub fn ensure_alive(&self) -> Result<(), HarvestError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(HarvestError::ServiceUnavailable {
                url: self.base_url.clone(),
            })
        }
    }

    /// Upload a PDF for full-text structuring and return the raw TEI XML
    /// response verbatim.
    pub fn process_fulltext(&self, pdf_path: &Path) -> Result<String> {
        info!("Processing {} with GROBID", pdf_path.display());

        let form = multipart::Form::new().file("input", pdf_path)?;
        let url = format!("{}/api/processFulltextDocument", self.base_url);
        let response = self.client.post(&url).multipart(form).send()?;

        if !response.status().is_success() {
            anyhow::bail!("GROBID returned status code {}", response.status());
        }

        Ok(response.text()?)
    }
}
