//! Reconciliation engine: links one document to the orders its invoice
//! number identifies.
//!
//! All writes for a document go through the connection the caller passes,
//! so the caller's transaction spans ledger and document-store changes.

use std::collections::BTreeMap;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use uuid::Uuid;

use super::traits::{clear_link, set_link, DocumentStore, Ledger, SqliteDocumentStore, SqliteLedger};
use super::ReconcileError;
use crate::models::enums::Scenario;
use crate::models::{DocumentRecord, OrderRecord};
use crate::pipeline::normalize::{is_non_identifying, normalize_invoice_number};

/// A client whose orders matched an invoice number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateClient {
    pub client_id: i64,
    pub client_name: Option<String>,
    pub order_ids: Vec<i64>,
}

/// Result of looking up orders for an invoice number. No writes.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateSearch {
    Invalid { reason: String },
    NotFound { key: String },
    /// One or more orders, all belonging to one client.
    Matched { key: String, orders: Vec<OrderRecord> },
    Ambiguous { key: String, clients: Vec<CandidateClient> },
}

/// Who currently holds an order's path for a document's kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathHolder {
    Free,
    /// The path already names this document.
    This,
    /// The path names a locator with no record behind it.
    Stale(String),
    Live { document_id: Uuid, locator: String },
}

/// What one reconciliation did.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub scenario: Scenario,
    pub linked_order_ids: Vec<i64>,
    pub candidates: Vec<CandidateClient>,
    pub warnings: Vec<String>,
    /// Stale same-kind paths cleared before linking.
    pub healed_paths: usize,
    /// Live records whose path on the single candidate order was replaced.
    pub replaced_documents: Vec<Uuid>,
    pub message: String,
}

impl ReconcileOutcome {
    fn unlinked(scenario: Scenario, message: String) -> Self {
        Self {
            scenario,
            linked_order_ids: Vec::new(),
            candidates: Vec::new(),
            warnings: Vec::new(),
            healed_paths: 0,
            replaced_documents: Vec::new(),
            message,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.scenario == Scenario::Linked
    }
}

/// Open an `IMMEDIATE` transaction on a shared connection.
///
/// The write lock is taken up front so a concurrent process cannot link the
/// same orders between our read and our write.
pub fn immediate_transaction(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

/// The invoice number used for matching: cached key first, then the fields.
pub fn invoice_number_of(record: &DocumentRecord) -> Option<&str> {
    record
        .cached_invoice_number
        .as_deref()
        .or(record.fields.invoice_number.as_deref())
}

pub struct ReconcileEngine {
    ledger: Box<dyn Ledger>,
    documents: Box<dyn DocumentStore>,
}

impl ReconcileEngine {
    pub fn new(ledger: Box<dyn Ledger>, documents: Box<dyn DocumentStore>) -> Self {
        Self { ledger, documents }
    }

    /// Engine over the SQLite ledger and document tables.
    pub fn sqlite() -> Self {
        Self::new(Box::new(SqliteLedger), Box::new(SqliteDocumentStore))
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    pub fn documents(&self) -> &dyn DocumentStore {
        self.documents.as_ref()
    }

    /// Find the orders a raw invoice number identifies.
    pub fn search_candidates(
        &self,
        conn: &Connection,
        raw: Option<&str>,
    ) -> Result<CandidateSearch, ReconcileError> {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Ok(CandidateSearch::Invalid {
                reason: "no invoice number was extracted".into(),
            });
        };
        if is_non_identifying(raw) {
            return Ok(CandidateSearch::Invalid {
                reason: format!("invoice number {raw:?} does not identify an invoice"),
            });
        }

        let key = normalize_invoice_number(raw);
        let orders = self.ledger.find_orders_by_normalized_invoice(conn, &key)?;
        if orders.is_empty() {
            return Ok(CandidateSearch::NotFound { key });
        }

        let mut by_client: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for order in &orders {
            by_client.entry(order.client_id).or_default().push(order.id);
        }
        if by_client.len() == 1 {
            return Ok(CandidateSearch::Matched { key, orders });
        }

        let mut clients = Vec::with_capacity(by_client.len());
        for (client_id, order_ids) in by_client {
            clients.push(CandidateClient {
                client_id,
                client_name: self.ledger.client_name(conn, client_id)?,
                order_ids,
            });
        }
        Ok(CandidateSearch::Ambiguous { key, clients })
    }

    /// Who holds `order`'s path for the record's kind.
    pub fn holder_of(
        &self,
        conn: &Connection,
        order: &OrderRecord,
        record: &DocumentRecord,
    ) -> Result<PathHolder, ReconcileError> {
        let Some(path) = order.path_for(record.kind) else {
            return Ok(PathHolder::Free);
        };
        if path == record.storage_locator {
            return Ok(PathHolder::This);
        }
        match self.documents.find_document_by_locator(conn, path)? {
            Some(holder) if holder.id != record.id => Ok(PathHolder::Live {
                document_id: holder.id,
                locator: holder.storage_locator,
            }),
            _ => Ok(PathHolder::Stale(path.to_string())),
        }
    }

    /// The live holder `record` may replace on a single candidate order.
    ///
    /// The holder keeps its path only when it was processed after `record`,
    /// so two documents for one order never keep displacing each other.
    pub fn replaceable_holder(
        &self,
        conn: &Connection,
        holder_id: &Uuid,
        record: &DocumentRecord,
    ) -> Result<Option<DocumentRecord>, ReconcileError> {
        let Some(holder) = self.documents.get_document_record(conn, holder_id)? else {
            return Ok(None);
        };
        if holder.processed_at > record.processed_at {
            return Ok(None);
        }
        Ok(Some(holder))
    }

    /// Link `record` to its orders using `conn` for every read and write.
    ///
    /// Sets `record.linked_order_id` on success but does not persist the
    /// record; the caller does that inside the same transaction.
    pub fn reconcile(
        &self,
        conn: &Connection,
        record: &mut DocumentRecord,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let orders = match self.search_candidates(conn, invoice_number_of(record))? {
            CandidateSearch::Invalid { reason } => {
                return Ok(ReconcileOutcome::unlinked(Scenario::Invalid, reason));
            }
            CandidateSearch::NotFound { key } => {
                return Ok(ReconcileOutcome::unlinked(
                    Scenario::NotFound,
                    format!("no order has invoice number {key}"),
                ));
            }
            CandidateSearch::Ambiguous { key, clients } => {
                let mut outcome = ReconcileOutcome::unlinked(
                    Scenario::Ambiguous,
                    format!("invoice number {key} matches orders of {} clients", clients.len()),
                );
                outcome.candidates = clients;
                return Ok(outcome);
            }
            CandidateSearch::Matched { orders, .. } => orders,
        };

        let mut outcome = ReconcileOutcome::unlinked(Scenario::Linked, String::new());
        let mut held_by = Vec::new();
        let single = orders.len() == 1;

        for order in &orders {
            match self.holder_of(conn, order, record)? {
                PathHolder::Live { document_id, locator } => {
                    outcome
                        .warnings
                        .push(format!("order {} already holds {locator}", order.id));
                    let replaceable = if single {
                        self.replaceable_holder(conn, &document_id, record)?
                    } else {
                        None
                    };
                    let Some(mut holder) = replaceable else {
                        held_by.push((order.id, document_id));
                        continue;
                    };
                    if holder.linked_order_id == Some(order.id) {
                        holder.linked_order_id = None;
                        self.documents.update_document_record(conn, &holder)?;
                    }
                    outcome.replaced_documents.push(holder.id);
                    tracing::warn!(
                        order_id = order.id,
                        previous = %locator,
                        document_id = %record.id,
                        kind = record.kind.as_str(),
                        "Replaced document path held by an older record"
                    );
                }
                PathHolder::Stale(path) => {
                    clear_link(self.ledger(), conn, record.kind, order.id)?;
                    outcome.healed_paths += 1;
                    tracing::warn!(
                        order_id = order.id,
                        path = %path,
                        kind = record.kind.as_str(),
                        "Cleared stale document path"
                    );
                }
                PathHolder::Free | PathHolder::This => {}
            }

            if let Some(warning) = counterparty_conflict(order, record) {
                tracing::warn!(order_id = order.id, document_id = %record.id, "{warning}");
                outcome.warnings.push(warning);
            }

            set_link(
                self.ledger(),
                conn,
                record.kind,
                order.id,
                &record.storage_locator,
                record.fields.due_date,
            )?;
            outcome.linked_order_ids.push(order.id);
        }

        if outcome.linked_order_ids.is_empty() {
            outcome.scenario = Scenario::AlreadyLinked;
            outcome.message = format!(
                "every matching order already holds another {} document",
                record.kind.as_str()
            );
            if let Some(first) = orders.first() {
                outcome.candidates.push(CandidateClient {
                    client_id: first.client_id,
                    client_name: first.client_name.clone(),
                    order_ids: held_by.iter().map(|(id, _)| *id).collect(),
                });
            }
            return Ok(outcome);
        }

        record.linked_order_id = outcome.linked_order_ids.iter().min().copied();
        outcome.message = match outcome.linked_order_ids.as_slice() {
            [only] => format!("linked to order {only}"),
            many => format!("linked to {} orders of one client", many.len()),
        };
        tracing::debug!(
            document_id = %record.id,
            orders = ?outcome.linked_order_ids,
            healed = outcome.healed_paths,
            "Document linked"
        );
        Ok(outcome)
    }

    /// Reconcile and persist one record in its own `IMMEDIATE` transaction.
    ///
    /// Any failure rolls back every write and leaves `record` as it was.
    pub fn reconcile_document(
        &self,
        conn: &Connection,
        record: &mut DocumentRecord,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let before = record.linked_order_id;
        let result = self.reconcile_and_persist(conn, record);
        if result.is_err() {
            record.linked_order_id = before;
        }
        result
    }

    fn reconcile_and_persist(
        &self,
        conn: &Connection,
        record: &mut DocumentRecord,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let tx = immediate_transaction(conn)?;
        let outcome = self.reconcile(&tx, record)?;
        self.documents.update_document_record(&tx, record)?;
        tx.commit()?;
        Ok(outcome)
    }
}

/// Warning when the order's billing company differs from the document issuer.
fn counterparty_conflict(order: &OrderRecord, record: &DocumentRecord) -> Option<String> {
    let flag = order.counterparty_flag.as_deref().map(str::trim).filter(|f| !f.is_empty())?;
    let issuer = record.fields.issuer.as_deref()?;
    if flag.eq_ignore_ascii_case(issuer) {
        return None;
    }
    Some(format!(
        "order {} is billed by {flag} but the document was issued by {issuer}",
        order.id
    ))
}
