pub mod enums;
pub mod document;
pub mod order;

pub use document::*;
pub use order::*;
