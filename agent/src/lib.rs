pub mod callbacks;
mod error;
pub mod html;
pub mod llm;
mod pipeline;
pub mod report;
pub mod scrape;
pub mod search;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use pipeline::{MAX_CONTENT_CHARS, Pipeline, PipelineBuilder, ResearchOutcome};
