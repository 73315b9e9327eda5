use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::enums::DocumentKind;

/// A sales order as seen by the reconciliation engine.
/// Only the two document paths and `due_date` are ever written by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: i64,
    pub client_id: i64,
    pub client_name: Option<String>,
    pub invoice_number: Option<String>,
    /// Billing company recorded on the order, if any.
    pub counterparty_flag: Option<String>,
    pub payment_slip_path: Option<String>,
    pub invoice_path: Option<String>,
    pub due_date: Option<NaiveDate>,
}

impl OrderRecord {
    /// The stored path for documents of `kind`.
    pub fn path_for(&self, kind: DocumentKind) -> Option<&str> {
        match kind {
            DocumentKind::PaymentSlip => self.payment_slip_path.as_deref(),
            DocumentKind::Invoice => self.invoice_path.as_deref(),
        }
        .filter(|p| !p.trim().is_empty())
    }
}

/// Fields of an order at creation time. Document paths start empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub client_id: i64,
    pub invoice_number: Option<String>,
    pub counterparty_flag: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: i64,
    pub name: String,
}
