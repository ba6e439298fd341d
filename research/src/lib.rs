pub mod config;
mod error;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod store;

pub use error::{Error, Result};
pub use runner::{JobRunner, JobSnapshot, JobStatus, ResearchRequest, Subscription};
