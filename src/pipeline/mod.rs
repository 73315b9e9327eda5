pub mod batch; // Staging → buckets → linked orders, one pass at a time
pub mod classify;
pub mod extraction;
pub mod intake;
pub mod normalize;
pub mod processor; // Per-file state machine
pub mod reconcile;
