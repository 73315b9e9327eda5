//! Field extraction: page text in, [`ExtractedFields`] out.
//!
//! Every field is found by an ordered list of named strategies (see
//! [`strategy`]). A field that no strategy finds is `None`; a miss is never an
//! error.

pub mod amount;
pub mod bonus;
pub mod due_date;
pub mod invoice_number;
pub mod payer_name;
pub mod sanitize;
pub mod strategy;
pub mod tax_id;
pub mod text;
pub mod text_layer;

pub use bonus::{detect_bonus, BonusEvidence, BonusMatch};
pub use text_layer::*;

use thiserror::Error;

use crate::config::EngineConfig;
use crate::models::{ExtractedFields, RawDocument};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("Text layer of page {page} unreadable: {reason}")]
    PdfText { page: usize, reason: String },

    #[error("PDFium unavailable: {0}")]
    PdfiumUnavailable(String),

    #[error("Unsupported format for extraction: {0}")]
    UnsupportedFormat(String),

    #[error("Document has no text")]
    EmptyDocument,
}

/// Run every field strategy over the upper region of `pages`.
pub fn extract_fields(pages: &[PageText], filename: &str, config: &EngineConfig) -> ExtractedFields {
    let text = upper_text(pages);
    let tax = tax_id::extract_tax_ids(&text, config);

    ExtractedFields {
        payer_tax_id: tax.payer_tax_id,
        invoice_number: invoice_number::extract_invoice_number(
            &text,
            filename,
            &config.false_positive_numbers,
        ),
        payer_legal_name: payer_name::extract_payer_name(&text),
        due_date: due_date::extract_due_date(&text),
        amount: amount::extract_amount(&text),
        issuer_only: tax.issuer_only,
        issuer: tax.issuer,
    }
}

/// Read the text layer of a raw document and extract its fields.
pub fn extract_document(
    document: &RawDocument,
    layer: &dyn TextLayer,
    config: &EngineConfig,
) -> Result<ExtractedFields, ExtractionError> {
    let pages = layer.pages(&document.bytes)?;
    let fields = extract_fields(&pages, &document.filename, config);

    tracing::debug!(
        filename = %document.filename,
        pages = pages.len(),
        invoice_number = fields.invoice_number.is_some(),
        payer_tax_id = fields.payer_tax_id.is_some(),
        issuer_only = fields.issuer_only,
        "Fields extracted"
    );
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_issuers;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn config() -> EngineConfig {
        EngineConfig {
            known_issuers: parse_issuers("PATY=11.222.333/0001-81"),
            ..EngineConfig::default()
        }
    }

    const SLIP: &str = "BANCO DO BRASIL | 001-9 | 00190.00009 01234.567891 23456.789012 3 96540000125000\n\
        Local de pagamento: Pagável em qualquer banco   Vencimento 15/03/2024\n\
        Beneficiário: PATY ALIMENTOS LTDA CNPJ 11.222.333/0001-81\n\
        Data do documento 01/03/2024   Nº do documento 012244   Espécie DM\n\
        (=) Valor do documento R$ 1.250,00\n\
        Pagador: MERCADO BOM PRECO LTDA - CNPJ: 22.333.444/0001-55\n\
        Sacador/Avalista\n\
        Autenticação mecânica - Ficha de Compensação";

    #[test]
    fn slip_fixture_fields() {
        let pages = PlainTextLayer.pages(SLIP.as_bytes()).unwrap();
        let fields = extract_fields(&pages, "boleto.pdf", &config());

        assert_eq!(fields.invoice_number.as_deref(), Some("012244"));
        assert_eq!(fields.payer_tax_id.as_deref(), Some("22333444000155"));
        assert_eq!(fields.payer_legal_name.as_deref(), Some("MERCADO BOM PRECO LTDA"));
        assert_eq!(fields.due_date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(fields.amount, Some(Decimal::from_str("1250.00").unwrap()));
        assert!(!fields.issuer_only);
        assert_eq!(fields.issuer.as_deref(), Some("PATY"));
    }

    #[test]
    fn issuer_only_invoice() {
        let text = "DANFE\nPATY ALIMENTOS LTDA CNPJ 11.222.333/0001-81\nNF-e Nº 000.012.263\nline\nline";
        let pages = vec![PageText::new(text, text)];
        let fields = extract_fields(&pages, "nf.pdf", &config());
        assert!(fields.issuer_only);
        assert_eq!(fields.payer_tax_id, None);
        assert_eq!(fields.invoice_number.as_deref(), Some("000012263"));
    }

    #[test]
    fn lower_quarter_ignored() {
        let page = PageText::new("Pedido\nNº do documento 5555", "Pedido");
        let fields = extract_fields(&[page], "scan.pdf", &config());
        assert_eq!(fields.invoice_number, None);
    }

    #[test]
    fn extraction_is_deterministic() {
        let pages = PlainTextLayer.pages(SLIP.as_bytes()).unwrap();
        let a = extract_fields(&pages, "boleto.pdf", &config());
        let b = extract_fields(&pages, "boleto.pdf", &config());
        assert_eq!(a, b);
    }

    #[test]
    fn extract_document_reads_bytes() {
        let raw = RawDocument {
            filename: "nf_4321.txt".into(),
            bytes: b"Texto sem rotulos".to_vec(),
        };
        let fields = extract_document(&raw, &PlainTextLayer, &config()).unwrap();
        assert_eq!(fields.invoice_number.as_deref(), Some("4321"));
    }
}
