//! Bonus-shipment detection.
//!
//! A bonus shipment (free goods, donations, samples) is an invoice that never
//! settles an order. The verdict is advisory: it only routes the file to the
//! bonus bucket during intake.

use super::text::fold_upper;

/// Most specific first.
const BONUS_PHRASES: &[&str] = &[
    "REMESSA EM BONIFICACAO",
    "AMOSTRA GRATIS",
    "BONIFICACAO",
    "DOACAO",
    "BRINDE",
];

const NATURE_FIELD: &str = "NATUREZA DA OPERACAO";
const PROXIMITY_ANCHORS: &[&str] = &["NATUREZA", "OPERACAO"];
/// Distance in characters between an anchor and a phrase.
const PROXIMITY_WINDOW: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BonusEvidence {
    /// Phrase found in the value of the operation-nature field.
    NatureField,
    /// Phrase found close to an operation-nature anchor.
    Proximity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusMatch {
    pub phrase: &'static str,
    pub evidence: BonusEvidence,
}

/// Inspect the full (unclipped) document text.
///
/// When the operation-nature field is present its value alone decides. The
/// proximity scan only runs for documents without that field.
pub fn detect_bonus(text: &str) -> Option<BonusMatch> {
    let folded = fold_upper(text);

    if let Some(value) = nature_field_value(&folded) {
        return BONUS_PHRASES
            .iter()
            .copied()
            .find(|p| value.contains(p))
            .map(|phrase| BonusMatch {
                phrase,
                evidence: BonusEvidence::NatureField,
            });
    }

    let anchors: Vec<usize> = PROXIMITY_ANCHORS
        .iter()
        .flat_map(|a| folded.match_indices(a).map(|(i, _)| char_offset(&folded, i)))
        .collect();
    if anchors.is_empty() {
        return None;
    }

    for &phrase in BONUS_PHRASES {
        for (i, _) in folded.match_indices(phrase) {
            let pos = char_offset(&folded, i);
            if anchors.iter().any(|&a| a.abs_diff(pos) <= PROXIMITY_WINDOW) {
                return Some(BonusMatch {
                    phrase,
                    evidence: BonusEvidence::Proximity,
                });
            }
        }
    }
    None
}

fn char_offset(text: &str, byte_index: usize) -> usize {
    text[..byte_index].chars().count()
}

/// Text after the field label on the same line, or the next non-empty line.
fn nature_field_value(folded: &str) -> Option<&str> {
    let start = folded.find(NATURE_FIELD)? + NATURE_FIELD.len();
    let rest = &folded[start..];
    let mut lines = rest.lines();
    let same_line = lines.next().unwrap_or("").trim_start_matches([' ', ':', '\t']).trim();
    if !same_line.is_empty() {
        return Some(same_line);
    }
    lines.map(str::trim).find(|l| !l.is_empty())
}
