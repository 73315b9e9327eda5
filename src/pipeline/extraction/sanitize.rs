/// Sanitize extracted text before it reaches the strategies.
/// Strips control characters, trims trailing whitespace per line, drops blank
/// lines.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect::<String>()
        .lines()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_bytes() {
        let raw = "Pagador: MERCADO\x00 X";
        let clean = sanitize_extracted_text(raw);
        assert!(!clean.contains('\x00'));
        assert_eq!(clean, "Pagador: MERCADO X");
    }

    #[test]
    fn strips_control_characters() {
        let raw = "Vencimento\x01\x02 15/03/2024\r\nValor 10,00";
        let clean = sanitize_extracted_text(raw);
        assert_eq!(clean, "Vencimento 15/03/2024\nValor 10,00");
    }

    #[test]
    fn preserves_currency_and_ordinal_marks() {
        let raw = "NF-e Nº 12244 · R$ 1.250,00 (ª via)";
        assert_eq!(sanitize_extracted_text(raw), raw);
    }

    #[test]
    fn drops_blank_lines() {
        assert_eq!(sanitize_extracted_text("a\n\n   \nb  "), "a\nb");
    }
}
