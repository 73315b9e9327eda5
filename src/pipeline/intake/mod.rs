pub mod format;
pub mod organizer;
pub mod storage;

pub use format::*;
pub use organizer::*;
pub use storage::*;

use thiserror::Error;

use crate::pipeline::extraction::ExtractionError;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage locator: {0}")]
    InvalidLocator(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
}
