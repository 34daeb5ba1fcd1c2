use thiserror::Error;

/// Errors the pipeline surfaces to callers.
///
/// Individual fetch and extraction failures are soft and never reach this
/// type; they degrade to "try the next source" or "skip this entry". The
/// variants here are the conditions a caller has to distinguish.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The GROBID service did not answer its liveness probe. This aborts
    /// the whole extraction phase rather than failing per document.
    #[error("GROBID service is not reachable at {url}")]
    ServiceUnavailable { url: String },

    #[error("no entries could be parsed from {path}")]
    NoEntries { path: String },
}
