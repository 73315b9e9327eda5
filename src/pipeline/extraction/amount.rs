//! Monetary amount extraction in Brazilian number format (`1.234,56`).

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Captures;
use rust_decimal::Decimal;

use super::strategy::{first_hit, Strategy};

const BRL: &str = r"(\d{1,3}(?:\.\d{3})+,\d{2}|\d+,\d{2})";

static AMOUNT_STRATEGIES: LazyLock<Vec<Strategy<Decimal>>> = LazyLock::new(|| {
    vec![
        Strategy::new(
            "document_value",
            &format!(r"(?i)valor\s+do\s+documento[^\d]{{0,30}}{BRL}"),
            positive,
        ),
        Strategy::new("charged_value", &format!(r"(?i)valor\s+cobrado[^\d]{{0,30}}{BRL}"), positive),
        Strategy::new(
            "invoice_total",
            &format!(r"(?i)valor\s+total\s+da\s+nota[^\d]{{0,30}}{BRL}"),
            positive,
        ),
        Strategy::new("total_value", &format!(r"(?i)valor\s+total[^\d]{{0,30}}{BRL}"), positive),
        Strategy::new("total", &format!(r"(?i)\btotal\b[^\d]{{0,30}}{BRL}"), positive),
        Strategy::new("currency_symbol", &format!(r"R\$\s*{BRL}"), positive),
        Strategy::new("currency_shaped", &format!(r"(?:^|[^\d.,]){BRL}(?:[^\d,]|$)"), positive),
    ]
});

fn positive(caps: &Captures<'_>) -> Option<Decimal> {
    parse_brl(caps.get(1)?.as_str()).filter(|d| *d > Decimal::ZERO)
}

/// `1.234,56` → 1234.56. Dots are thousands separators, the comma is decimal.
pub fn parse_brl(raw: &str) -> Option<Decimal> {
    let normalized = raw.trim().replace('.', "").replace(',', ".");
    Decimal::from_str(&normalized).ok()
}

pub fn extract_amount(text: &str) -> Option<Decimal> {
    let hit = first_hit(&AMOUNT_STRATEGIES, text)?;
    tracing::debug!(strategy = hit.strategy, "Amount found");
    Some(hit.value)
}
