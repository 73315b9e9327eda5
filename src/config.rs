use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "Doclink";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bucket names under the blob root. The staging area is where uploads land.
pub const STAGING_DIR: &str = "staging";
pub const INVOICE_BUCKET: &str = "invoices";
pub const SLIP_BUCKET: &str = "slips";
pub const BONUS_BUCKET: &str = "bonus";
pub const UNCLASSIFIED_BUCKET: &str = "unclassified";

/// Default number of threads used for text extraction within a pass.
const DEFAULT_EXTRACTION_WORKERS: usize = 4;

/// Get the application data directory.
/// `DOCLINK_DATA_DIR` wins; otherwise ~/Doclink/.
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DOCLINK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Root of the blob store (staging + buckets live here).
pub fn blob_root() -> PathBuf {
    app_data_dir().join("documents")
}

/// SQLite database location.
pub fn database_path() -> PathBuf {
    app_data_dir().join("doclink.db")
}

/// Default `EnvFilter` directive when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if is_dev() {
        "doclink=debug,info"
    } else {
        "doclink=info,warn"
    }
}

/// Debug builds log more verbosely.
pub fn is_dev() -> bool {
    cfg!(debug_assertions)
}

/// One of the business's own companies. Documents it issues carry this tax ID,
/// so it must never be mistaken for the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownIssuer {
    /// Short billing-company code, compared with an order's counterparty flag.
    pub code: String,
    /// Digits-only tax ID.
    pub tax_id: String,
}

/// Runtime configuration for extraction and batch passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub blob_root: PathBuf,
    pub database_path: PathBuf,
    pub known_issuers: Vec<KnownIssuer>,
    /// Numbers that look like invoice numbers on the known templates but never are.
    pub false_positive_numbers: Vec<String>,
    pub extraction_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            blob_root: blob_root(),
            database_path: database_path(),
            known_issuers: Vec::new(),
            false_positive_numbers: Vec::new(),
            extraction_workers: DEFAULT_EXTRACTION_WORKERS,
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// - `DOCLINK_ISSUERS`: `CODE=taxid;CODE=taxid`
    /// - `DOCLINK_FALSE_POSITIVE_NUMBERS`: comma separated
    /// - `DOCLINK_WORKERS`: extraction thread count
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("DOCLINK_ISSUERS") {
            config.known_issuers = parse_issuers(&raw);
        }
        if let Ok(raw) = std::env::var("DOCLINK_FALSE_POSITIVE_NUMBERS") {
            config.false_positive_numbers = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(raw) = std::env::var("DOCLINK_WORKERS") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.extraction_workers = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid DOCLINK_WORKERS"),
            }
        }

        config
    }

    /// Issuer code for a digits-only tax ID, if it belongs to the business.
    pub fn issuer_for(&self, tax_id_digits: &str) -> Option<&str> {
        self.known_issuers
            .iter()
            .find(|i| i.tax_id == tax_id_digits)
            .map(|i| i.code.as_str())
    }
}

/// Parse `CODE=taxid;CODE=taxid`. Malformed entries are skipped with a warning.
pub fn parse_issuers(raw: &str) -> Vec<KnownIssuer> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let Some((code, tax_id)) = entry.split_once('=') else {
                tracing::warn!(entry, "Ignoring malformed issuer entry");
                return None;
            };
            let digits: String = tax_id.chars().filter(|c| c.is_ascii_digit()).collect();
            if code.trim().is_empty() || digits.is_empty() {
                tracing::warn!(entry, "Ignoring malformed issuer entry");
                return None;
            }
            Some(KnownIssuer {
                code: code.trim().to_uppercase(),
                tax_id: digits,
            })
        })
        .collect()
}
