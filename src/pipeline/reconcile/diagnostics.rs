//! Read-only explanations for why a document is or is not linked.

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::engine::{invoice_number_of, CandidateClient, CandidateSearch, PathHolder, ReconcileEngine};
use super::ReconcileError;
use crate::models::enums::{DocumentKind, Scenario};
use crate::models::DocumentRecord;

#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub document_id: Uuid,
    pub locator: String,
    pub kind: DocumentKind,
    pub scenario: Scenario,
    pub message: String,
    pub candidates: Vec<CandidateClient>,
}

impl ReconcileEngine {
    pub fn diagnose(&self, conn: &Connection, document_id: &Uuid) -> Result<Diagnosis, ReconcileError> {
        let record = self
            .documents()
            .get_document_record(conn, document_id)?
            .ok_or(ReconcileError::DocumentNotFound(*document_id))?;
        self.diagnose_record(conn, &record)
    }

    pub fn diagnose_locator(&self, conn: &Connection, locator: &str) -> Result<Diagnosis, ReconcileError> {
        let record = self
            .documents()
            .find_document_by_locator(conn, locator)?
            .ok_or_else(|| ReconcileError::LocatorNotFound(locator.to_string()))?;
        self.diagnose_record(conn, &record)
    }

    /// Diagnoses for every record without a linked order, ordered by locator.
    pub fn list_unlinked(&self, conn: &Connection) -> Result<Vec<Diagnosis>, ReconcileError> {
        self.documents()
            .list_document_records(conn)?
            .iter()
            .filter(|r| !r.is_linked())
            .map(|r| self.diagnose_record(conn, r))
            .collect()
    }

    /// Run the engine's candidate search for `record` without writing.
    pub fn diagnose_record(&self, conn: &Connection, record: &DocumentRecord) -> Result<Diagnosis, ReconcileError> {
        let diagnosis = |scenario: Scenario, message: String, candidates: Vec<CandidateClient>| Diagnosis {
            document_id: record.id,
            locator: record.storage_locator.clone(),
            kind: record.kind,
            scenario,
            message,
            candidates,
        };

        if let Some(order_id) = record.linked_order_id {
            if self.ledger().get_order(conn, order_id)?.is_some() {
                return Ok(diagnosis(Scenario::Linked, format!("linked to order {order_id}"), Vec::new()));
            }
        }

        let orders = match self.search_candidates(conn, invoice_number_of(record))? {
            CandidateSearch::Invalid { reason } => return Ok(diagnosis(Scenario::Invalid, reason, Vec::new())),
            CandidateSearch::NotFound { key } => {
                return Ok(diagnosis(
                    Scenario::NotFound,
                    format!("no order has invoice number {key}"),
                    Vec::new(),
                ));
            }
            CandidateSearch::Ambiguous { key, clients } => {
                let message = format!(
                    "invoice number {key} matches orders of {} clients; pick one manually",
                    clients.len()
                );
                return Ok(diagnosis(Scenario::Ambiguous, message, clients));
            }
            CandidateSearch::Matched { orders, .. } => orders,
        };

        let single = orders.len() == 1;
        let mut open = Vec::new();
        let mut held = Vec::new();
        let mut replaces = Vec::new();
        for order in &orders {
            match self.holder_of(conn, order, record)? {
                PathHolder::Live { document_id, locator } => {
                    if single && self.replaceable_holder(conn, &document_id, record)?.is_some() {
                        replaces.push(locator);
                        open.push(order.id);
                    } else {
                        held.push(order.id);
                    }
                }
                PathHolder::Free | PathHolder::This | PathHolder::Stale(_) => open.push(order.id),
            }
        }

        let first = &orders[0];
        let client = |order_ids: Vec<i64>| CandidateClient {
            client_id: first.client_id,
            client_name: first.client_name.clone(),
            order_ids,
        };
        if open.is_empty() {
            let message = format!(
                "orders {held:?} already hold another {} document",
                record.kind.as_str()
            );
            return Ok(diagnosis(Scenario::AlreadyLinked, message, vec![client(held)]));
        }
        let message = match replaces.as_slice() {
            [] => format!("the next pass links orders {open:?}"),
            [previous] => format!("the next pass links orders {open:?}, replacing {previous}"),
            many => format!("the next pass links orders {open:?}, replacing {}", many.join(", ")),
        };
        Ok(diagnosis(Scenario::Linkable, message, vec![client(open)]))
    }
}
