//! Document-to-order reconciliation.
//!
//! `engine` links one document inside a transaction; `diagnostics` explains,
//! without writing, why a document is not linked.

pub mod diagnostics;
pub mod engine;
pub mod traits;

pub use diagnostics::*;
pub use engine::*;
pub use traits::*;

use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    #[error("Document record not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("No document record for locator: {0}")]
    LocatorNotFound(String),
}
