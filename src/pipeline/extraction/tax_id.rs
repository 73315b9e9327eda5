//! Payer tax-ID extraction (CNPJ / CPF).
//!
//! The business's own tax IDs appear on every document it issues, so they are
//! partitioned out first. Anchored strategies look for an ID near a payer,
//! recipient or legal-name label; otherwise the last non-issuer ID in reading
//! order is taken (templates print the issuer first).

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::strategy::{all_hits, Strategy};
use crate::config::EngineConfig;
use crate::pipeline::normalize::normalize_tax_id;

/// CNPJ with optional punctuation, or punctuated CPF.
const TAX_ID: &str = r"\d{2}\.?\d{3}\.?\d{3}/?\d{4}-?\d{2}|\d{3}\.\d{3}\.\d{3}-\d{2}";

static TAX_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:^|[^\d])({TAX_ID})(?:[^\d]|$)")).expect("Invalid tax ID pattern")
});

static PAYER_STRATEGIES: LazyLock<Vec<Strategy<String>>> = LazyLock::new(|| {
    vec![
        Strategy::new(
            "payer_label",
            &format!(r"(?i)(?:pagador|sacado)[^\n]{{0,160}}?({TAX_ID})"),
            digits,
        ),
        Strategy::new(
            "recipient_block",
            &format!(r"(?i)destinat[aá]rio(?:\s*/\s*remetente)?[\s\S]{{0,300}}?({TAX_ID})"),
            digits,
        ),
        Strategy::new(
            "legal_name_label",
            &format!(r"(?i)(?:nome\s*/\s*)?raz[aã]o\s+social[\s\S]{{0,200}}?({TAX_ID})"),
            digits,
        ),
    ]
});

fn digits(caps: &Captures<'_>) -> Option<String> {
    caps.get(1).map(|m| normalize_tax_id(m.as_str()))
}

/// What the tax-ID pass learned about a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxIdFindings {
    pub payer_tax_id: Option<String>,
    pub issuer_only: bool,
    pub issuer: Option<String>,
}

/// Every tax ID in reading order, digits only.
pub fn find_all_tax_ids(text: &str) -> Vec<String> {
    // The delimiter groups consume one character, so run the search per line
    // and re-scan from each match end to catch adjacent IDs.
    let mut found = Vec::new();
    for line in text.lines() {
        let mut rest = line;
        while let Some(caps) = TAX_ID_PATTERN.captures(rest) {
            let Some(m) = caps.get(1) else { break };
            found.push(normalize_tax_id(m.as_str()));
            rest = &rest[m.end()..];
        }
    }
    found
}

pub fn extract_tax_ids(text: &str, config: &EngineConfig) -> TaxIdFindings {
    let all = find_all_tax_ids(text);
    if all.is_empty() {
        return TaxIdFindings::default();
    }

    let issuer = all
        .iter()
        .find_map(|id| config.issuer_for(id))
        .map(str::to_string);
    let candidates: Vec<&String> = all.iter().filter(|id| config.issuer_for(id).is_none()).collect();

    if candidates.is_empty() {
        tracing::debug!(issuer = ?issuer, "Only issuer tax IDs found");
        return TaxIdFindings {
            payer_tax_id: None,
            issuer_only: true,
            issuer,
        };
    }

    let anchored = all_hits(&PAYER_STRATEGIES, text).find(|hit| config.issuer_for(&hit.value).is_none());
    let payer = match anchored {
        Some(hit) => {
            tracing::debug!(strategy = hit.strategy, "Payer tax ID found");
            hit.value
        }
        None => {
            tracing::debug!("Payer tax ID taken from last candidate");
            candidates[candidates.len() - 1].clone()
        }
    };

    TaxIdFindings {
        payer_tax_id: Some(payer),
        issuer_only: false,
        issuer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_issuers;

    fn config() -> EngineConfig {
        EngineConfig {
            known_issuers: parse_issuers("PATY=11.222.333/0001-81;DESTAK=44.555.666/0001-99"),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn finds_punctuated_and_plain_ids() {
        let ids = find_all_tax_ids("CNPJ 11.222.333/0001-81 e 98765432000110\nCPF 123.456.789-09");
        assert_eq!(ids, vec!["11222333000181", "98765432000110", "12345678909"]);
    }

    #[test]
    fn ignores_longer_digit_runs() {
        assert!(find_all_tax_ids("barcode 237912345678901234567890").is_empty());
    }

    #[test]
    fn issuer_only_document() {
        let text = "PATY ALIMENTOS LTDA\nCNPJ: 11.222.333/0001-81\nNF 12244";
        let f = extract_tax_ids(text, &config());
        assert!(f.issuer_only);
        assert_eq!(f.payer_tax_id, None);
        assert_eq!(f.issuer.as_deref(), Some("PATY"));
    }

    #[test]
    fn anchored_payer_label_wins() {
        let text = "Beneficiário PATY CNPJ 11.222.333/0001-81\n\
                    Pagador: MERCADO BOM PRECO LTDA CNPJ: 22.333.444/0001-55\n\
                    Sacador/Avalista 33.444.555/0001-66";
        let f = extract_tax_ids(text, &config());
        assert_eq!(f.payer_tax_id.as_deref(), Some("22333444000155"));
        assert!(!f.issuer_only);
    }

    #[test]
    fn anchored_skips_denylisted_ids() {
        let text = "Pagador PATY 11.222.333/0001-81\nDESTINATÁRIO\nRAZÃO SOCIAL MERCADO X\n22.333.444/0001-55";
        let f = extract_tax_ids(text, &config());
        assert_eq!(f.payer_tax_id.as_deref(), Some("22333444000155"));
    }

    #[test]
    fn falls_back_to_last_candidate() {
        let text = "11.222.333/0001-81\n55.666.777/0001-00\n22.333.444/0001-55";
        let f = extract_tax_ids(text, &config());
        assert_eq!(f.payer_tax_id.as_deref(), Some("22333444000155"));
    }

    #[test]
    fn no_ids_yields_nothing() {
        let f = extract_tax_ids("no identifiers here", &config());
        assert_eq!(f, TaxIdFindings::default());
    }
}
