//! Invoice-number extraction.
//!
//! Label strategies run over the document text; when none yields a plausible
//! number, 4 to 6 digit groups in the filename are tried.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::strategy::{all_hits, Strategy};
use crate::pipeline::normalize::normalize_invoice_number;

/// A captured number plus whether its label carried an NF prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberCandidate {
    pub digits: String,
    pub nf_prefixed: bool,
}

const NUMBER: &str = r"(\d[\d.]*\d|\d)";

static INVOICE_STRATEGIES: LazyLock<Vec<Strategy<NumberCandidate>>> = LazyLock::new(|| {
    vec![
        Strategy::new(
            "document_number_abbrev",
            &format!(r"(?i)n[º°o]\.?\s*do\s+documento[^\d\n]{{0,20}}(?:\n[^\d\n]{{0,20}})?{NUMBER}"),
            plain,
        ),
        Strategy::new(
            "document_number",
            &format!(r"(?i)n[uú]mero\s+do\s+documento[^\d\n]{{0,20}}(?:\n[^\d\n]{{0,20}})?{NUMBER}"),
            plain,
        ),
        Strategy::new(
            "nfe_number",
            &format!(r"(?i)\bnf-?e\s*n[º°o]?\.?\s*:?\s*{NUMBER}"),
            prefixed,
        ),
        Strategy::new(
            "nf_number",
            &format!(r"(?i)\bnf\s*n[º°o]\.?\s*:?\s*{NUMBER}"),
            prefixed,
        ),
        Strategy::new("nf_colon", &format!(r"(?i)\bnf\s*:\s*{NUMBER}"), prefixed),
        Strategy::new(
            "nota_fiscal_number",
            &format!(r"(?i)nota\s+fiscal(?:\s+eletr[oô]nica)?\s*n[º°o]?\.?\s*:?\s*{NUMBER}"),
            prefixed,
        ),
        Strategy::new("number_sign", &format!(r"(?i)\bn[º°]\.?\s*:?\s*{NUMBER}"), plain),
    ]
});

static FILENAME_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{4,6})(?:\D|$)").expect("Invalid filename number pattern")
});

fn digits_of(caps: &Captures<'_>) -> Option<String> {
    let raw = caps.get(1)?.as_str();
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

fn plain(caps: &Captures<'_>) -> Option<NumberCandidate> {
    digits_of(caps).map(|digits| NumberCandidate {
        digits,
        nf_prefixed: false,
    })
}

fn prefixed(caps: &Captures<'_>) -> Option<NumberCandidate> {
    digits_of(caps).map(|digits| NumberCandidate {
        digits,
        nf_prefixed: true,
    })
}

/// Whether a candidate is a believable invoice number.
///
/// The canonical form must have 4 to 6 digits. Longer NF-prefixed numbers (up to
/// 9 digits, the NF-e maximum) are accepted; an unprefixed 8-digit value is a
/// phone number.
pub fn is_plausible(candidate: &NumberCandidate, false_positives: &[String]) -> bool {
    let canonical = normalize_invoice_number(&candidate.digits);
    if false_positives
        .iter()
        .any(|fp| normalize_invoice_number(fp) == canonical)
    {
        return false;
    }
    match canonical.len() {
        4..=6 => true,
        7..=9 => candidate.nf_prefixed,
        _ => false,
    }
}

/// Find the invoice number in `text`, falling back to the filename.
pub fn extract_invoice_number(text: &str, filename: &str, false_positives: &[String]) -> Option<String> {
    if let Some(hit) = all_hits(&INVOICE_STRATEGIES, text).find(|h| is_plausible(&h.value, false_positives)) {
        tracing::debug!(strategy = hit.strategy, "Invoice number found");
        return Some(hit.value.digits);
    }

    let stem = std::path::Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut rest = stem.as_str();
    while let Some(caps) = FILENAME_NUMBER.captures(rest) {
        let Some(m) = caps.get(1) else { break };
        let candidate = NumberCandidate {
            digits: m.as_str().to_string(),
            nf_prefixed: false,
        };
        if is_plausible(&candidate, false_positives) {
            tracing::debug!(strategy = "filename", "Invoice number found");
            return Some(candidate.digits);
        }
        rest = &rest[m.end()..];
    }
    None
}
