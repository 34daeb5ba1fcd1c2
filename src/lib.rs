pub mod bib;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod retrieve;
pub mod tei;

pub use error::HarvestError;
pub use pipeline::{Pipeline, PipelineSummary};
