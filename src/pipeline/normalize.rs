//! Identifier canonicalization.
//!
//! Pure functions turning raw invoice numbers and tax IDs into comparison
//! keys. An empty key means "no identifier" and never matches anything.

/// Literal prefixes that precede invoice numbers on the known templates.
/// Longest first so "NF-E" wins over "NF".
const INVOICE_PREFIXES: &[&str] = &[
    "NOTA FISCAL",
    "DANFE",
    "NF-E",
    "NFE",
    "NF",
    "Nº",
    "N°",
    "NO.",
    "N.",
];

/// Raw tokens meaning "there is no invoice".
const NON_IDENTIFYING_TOKENS: &[&str] = &[
    "S/N", "SN", "N/A", "NA", "SEM", "SEM NF", "SEM NOTA", "NONE", "NULL", "-",
];

/// Allowed length of an installment suffix (e.g. "12263" + "01").
const SUFFIX_MIN_DIGITS: usize = 2;
const SUFFIX_MAX_DIGITS: usize = 4;

/// Canonical invoice number: prefix stripped, digits only, no leading zeros.
///
/// An all-zero number collapses to "0". Input without digits yields "".
pub fn normalize_invoice_number(raw: &str) -> String {
    let stripped = strip_invoice_prefix(raw.trim());
    let digits: String = stripped.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_invoice_prefix(raw: &str) -> &str {
    let upper = raw.to_uppercase();
    for prefix in INVOICE_PREFIXES {
        if upper.starts_with(prefix) {
            // Uppercasing can change byte lengths for non-ASCII input; only
            // slice when the boundary lines up.
            let len = prefix.len();
            if raw.is_char_boundary(len) && raw[..len].to_uppercase() == *prefix {
                return raw[len..].trim_start_matches(|c: char| {
                    c.is_whitespace() || matches!(c, ':' | '.' | '-' | '#' | 'º' | '°')
                });
            }
        }
    }
    raw
}

/// Whether two raw invoice numbers identify the same invoice.
///
/// Equal canonical forms match. A canonical form that extends the other by a
/// 2 to 4 digit suffix also matches (installment / split invoices).
pub fn invoice_numbers_match(a: &str, b: &str) -> bool {
    canonical_keys_match(&normalize_invoice_number(a), &normalize_invoice_number(b))
}

/// Same as [`invoice_numbers_match`] for keys that are already canonical.
pub fn canonical_keys_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (a, b) } else { (b, a) };
    if !long.starts_with(short) {
        return false;
    }
    let extra = long.len() - short.len();
    (SUFFIX_MIN_DIGITS..=SUFFIX_MAX_DIGITS).contains(&extra)
}

/// True when the raw value is a placeholder rather than a real invoice number.
pub fn is_non_identifying(raw: &str) -> bool {
    let upper = raw.trim().to_uppercase();
    if upper.is_empty() || NON_IDENTIFYING_TOKENS.contains(&upper.as_str()) {
        return true;
    }
    let key = normalize_invoice_number(raw);
    key.is_empty() || key == "0"
}

/// Digits-only tax ID. Equality comparison only, never prefix matching.
pub fn normalize_tax_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Display form of a 14-digit CNPJ (`00.000.000/0000-00`). Other lengths
/// are returned digits-only.
pub fn format_tax_id(raw: &str) -> String {
    let d = normalize_tax_id(raw);
    if d.len() == 14 {
        format!("{}.{}.{}/{}-{}", &d[0..2], &d[2..5], &d[5..8], &d[8..12], &d[12..14])
    } else if d.len() == 11 {
        format!("{}.{}.{}-{}", &d[0..3], &d[3..6], &d[6..9], &d[9..11])
    } else {
        d
    }
}
