//! Payer legal-name extraction.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::strategy::{all_hits, Strategy};
use super::text::{fold_upper, squeeze_spaces, truncate_chars};

const MAX_NAME_CHARS: usize = 200;

const TAX_ID: &str = r"\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}|\d{3}\.\d{3}\.\d{3}-\d{2}";

/// Column headers that sit where a name would on table-shaped templates.
const HEADER_PREFIXES: &[&str] = &[
    "NOME/RAZAO SOCIAL",
    "NOME / RAZAO SOCIAL",
    "RAZAO SOCIAL",
    "CNPJ",
    "CPF",
    "ENDERECO",
    "DATA DA EMISSAO",
    "DATA DE EMISSAO",
    "DATA DE VENCIMENTO",
    "VENCIMENTO",
    "INSCRICAO ESTADUAL",
    "BAIRRO",
    "MUNICIPIO",
    "CEP",
    "DESTINATARIO",
    "BENEFICIARIO",
    "PAGADOR",
    "SACADO",
];

static NAME_STRATEGIES: LazyLock<Vec<Strategy<String>>> = LazyLock::new(|| {
    vec![
        Strategy::new(
            "slip_payer_inline",
            r"(?im)\b(?:pagador|sacado)\b[ \t]*:?[ \t]*([^\n]+)",
            first_usable,
        ),
        Strategy::new(
            "invoice_legal_name",
            &format!(
                r"(?i)raz[aã]o\s+social[ \t]*:?[ \t]*([^\n]*)(?:\n[ \t]*([^\n]*))?[\s\S]{{0,300}}?(?:{TAX_ID})"
            ),
            first_usable,
        ),
    ]
});

/// Everything from the first tax-ID label, tax ID or date onwards.
static TRAILING_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:CNPJ|CPF)\b|{TAX_ID}|\d{{1,2}}[/.\-]\d{{1,2}}[/.\-]\d{{2,4}}"
    ))
    .expect("Invalid name noise pattern")
});

fn first_usable(caps: &Captures<'_>) -> Option<String> {
    caps.iter()
        .skip(1)
        .flatten()
        .find_map(|m| clean_name(m.as_str()))
}

/// Trim a raw capture to a bare name, or reject it.
pub fn clean_name(raw: &str) -> Option<String> {
    let cut = match TRAILING_NOISE.find(raw) {
        Some(m) => &raw[..m.start()],
        None => raw,
    };
    let squeezed = squeeze_spaces(cut);
    let name = squeezed
        .trim()
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '/' | ',' | '.' | '|'))
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '|'));

    if name.chars().count() <= 2 || is_header(name) {
        return None;
    }
    Some(truncate_chars(name, MAX_NAME_CHARS))
}

fn is_header(value: &str) -> bool {
    let folded = fold_upper(value);
    HEADER_PREFIXES.iter().any(|h| folded.starts_with(h))
}

pub fn extract_payer_name(text: &str) -> Option<String> {
    let hit = all_hits(&NAME_STRATEGIES, text).next()?;
    tracing::debug!(strategy = hit.strategy, "Payer name found");
    Some(hit.value)
}
