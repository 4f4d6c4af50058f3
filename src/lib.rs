pub mod config;
pub mod converter;
pub mod engine;
pub mod job;
pub mod package;
pub mod service;
pub mod state;
pub mod sweeper;

pub use config::Config;
pub use engine::SubmitError;
pub use service::{Artifact, ConversionService, RetrieveError};
