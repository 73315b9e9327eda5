use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::DocumentKind;

/// A document blob as delivered by intake. Lives only for one pass.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Candidate fields pulled out of a document's text.
/// Produced once per extraction; a re-extraction yields a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub payer_tax_id: Option<String>,
    pub invoice_number: Option<String>,
    pub payer_legal_name: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    /// Every tax ID found belongs to a known issuer; no payer identified.
    pub issuer_only: bool,
    /// Code of the first known issuer found in the text.
    pub issuer: Option<String>,
}

/// Persisted state of one processed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub storage_locator: String,
    pub kind: DocumentKind,
    pub fields: ExtractedFields,
    /// Idempotency key: when set, extraction is skipped on later passes.
    pub cached_invoice_number: Option<String>,
    pub linked_order_id: Option<i64>,
    pub owner_user_id: Option<i64>,
    pub processed_at: NaiveDateTime,
}

impl DocumentRecord {
    pub fn new(storage_locator: &str, kind: DocumentKind, owner_user_id: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            storage_locator: storage_locator.to_string(),
            kind,
            fields: ExtractedFields::default(),
            cached_invoice_number: None,
            linked_order_id: None,
            owner_user_id,
            processed_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked_order_id.is_some()
    }

    /// Replace cached fields with a fresh extraction.
    pub fn apply_extraction(&mut self, fields: ExtractedFields) {
        self.cached_invoice_number = fields.invoice_number.clone();
        self.fields = fields;
    }
}
