//! Repository layer: entity-scoped database operations.
//!
//! Free functions taking `&Connection`, so a caller-held transaction spans
//! every write for one document.

mod consistency;
mod document;
mod order;

pub use consistency::*;
pub use document::*;
pub use order::*;
