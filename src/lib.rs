//! Doclink links scanned invoices and payment slips to the sales orders they
//! settle.
//!
//! A pass files uploads from the staging area into buckets, extracts the
//! identifying fields of each bucketed document and writes the document's
//! location onto every order its invoice number identifies.

pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

/// Install the `tracing` subscriber. `RUST_LOG` wins over the built-in
/// default filter. Safe to call more than once.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Doclink v{}", config::APP_VERSION);
    }
}
