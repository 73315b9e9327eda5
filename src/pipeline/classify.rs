//! Document classification from first-page text.
//!
//! Invoice markers are checked before slip markers: an invoice with an
//! attached slip ("fatura/duplicata") prints bank names too.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::enums::DocumentClass;
use crate::pipeline::extraction::text::fold_upper;

const INVOICE_MARKERS: &[&str] = &["DANFE", "NOTA FISCAL", "NF-E"];

const SLIP_MARKERS: &[&str] = &[
    "BOLETO",
    "LINHA DIGITAVEL",
    "FICHA DE COMPENSACAO",
    "RECIBO DO PAGADOR",
];

const BANK_MARKERS: &[&str] = &[
    "BANCO DO BRASIL",
    "ITAU",
    "BRADESCO",
    "SANTANDER",
    "CAIXA ECONOMICA",
    "SICOOB",
    "SICREDI",
    "INTER",
];

struct Marker {
    label: &'static str,
    regex: Regex,
}

fn markers(labels: &[&'static str]) -> Vec<Marker> {
    labels
        .iter()
        .map(|&label| Marker {
            label,
            regex: Regex::new(&format!(r"\b{}\b", regex::escape(label)))
                .expect("Invalid classifier marker pattern"),
        })
        .collect()
}

static INVOICE: LazyLock<Vec<Marker>> = LazyLock::new(|| markers(INVOICE_MARKERS));
static SLIP: LazyLock<Vec<Marker>> =
    LazyLock::new(|| markers(&[SLIP_MARKERS, BANK_MARKERS].concat()));

fn first_marker(markers: &[Marker], text: &str) -> Option<&'static str> {
    markers.iter().find(|m| m.regex.is_match(text)).map(|m| m.label)
}

/// Classify a document from the text of its first page. Never returns
/// `BonusShipment`; that verdict comes from the bonus detector.
pub fn classify(first_page: &str) -> DocumentClass {
    let folded = fold_upper(first_page);

    if let Some(marker) = first_marker(&INVOICE, &folded) {
        tracing::debug!(marker, "Classified as invoice");
        return DocumentClass::Invoice;
    }
    if let Some(marker) = first_marker(&SLIP, &folded) {
        tracing::debug!(marker, "Classified as payment slip");
        return DocumentClass::PaymentSlip;
    }
    DocumentClass::Unclassified
}
