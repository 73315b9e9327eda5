//! Trait seams between the engine and its collaborators.
//!
//! - Ledger: sales orders and clients (owned by the surrounding product)
//! - DocumentStore: processed document records
//!
//! Every method takes the connection so one transaction spans all writes
//! for a document. `SqliteLedger` and `SqliteDocumentStore` delegate to the
//! repository functions.

use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::repository;
use crate::db::DatabaseError;
use crate::models::enums::DocumentKind;
use crate::models::{DocumentRecord, OrderRecord};

pub trait Ledger: Send + Sync {
    /// Orders whose invoice number matches the canonical `key`, ordered by id.
    fn find_orders_by_normalized_invoice(
        &self,
        conn: &Connection,
        key: &str,
    ) -> Result<Vec<OrderRecord>, DatabaseError>;

    fn get_order(&self, conn: &Connection, id: i64) -> Result<Option<OrderRecord>, DatabaseError>;

    /// Set the slip path; `due_date` is written only when present.
    fn set_slip_link(
        &self,
        conn: &Connection,
        order_id: i64,
        locator: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<(), DatabaseError>;

    fn set_invoice_link(&self, conn: &Connection, order_id: i64, locator: &str) -> Result<(), DatabaseError>;

    fn clear_slip_link(&self, conn: &Connection, order_id: i64) -> Result<(), DatabaseError>;

    fn clear_invoice_link(&self, conn: &Connection, order_id: i64) -> Result<(), DatabaseError>;

    fn orders_with_links(&self, conn: &Connection) -> Result<Vec<OrderRecord>, DatabaseError>;

    fn client_name(&self, conn: &Connection, client_id: i64) -> Result<Option<String>, DatabaseError>;
}

pub trait DocumentStore: Send + Sync {
    fn create_document_record(&self, conn: &Connection, record: &DocumentRecord) -> Result<(), DatabaseError>;

    fn find_document_by_locator(
        &self,
        conn: &Connection,
        locator: &str,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;

    fn get_document_record(&self, conn: &Connection, id: &Uuid) -> Result<Option<DocumentRecord>, DatabaseError>;

    fn update_document_record(&self, conn: &Connection, record: &DocumentRecord) -> Result<(), DatabaseError>;

    fn delete_document_record(&self, conn: &Connection, id: &Uuid) -> Result<(), DatabaseError>;

    fn list_document_records(&self, conn: &Connection) -> Result<Vec<DocumentRecord>, DatabaseError>;
}

/// Write the path field for `kind`. Slips also carry the due date.
pub fn set_link(
    ledger: &dyn Ledger,
    conn: &Connection,
    kind: DocumentKind,
    order_id: i64,
    locator: &str,
    due_date: Option<NaiveDate>,
) -> Result<(), DatabaseError> {
    match kind {
        DocumentKind::PaymentSlip => ledger.set_slip_link(conn, order_id, locator, due_date),
        DocumentKind::Invoice => ledger.set_invoice_link(conn, order_id, locator),
    }
}

/// Clear the path field for `kind`, leaving the other kind's path alone.
pub fn clear_link(
    ledger: &dyn Ledger,
    conn: &Connection,
    kind: DocumentKind,
    order_id: i64,
) -> Result<(), DatabaseError> {
    match kind {
        DocumentKind::PaymentSlip => ledger.clear_slip_link(conn, order_id),
        DocumentKind::Invoice => ledger.clear_invoice_link(conn, order_id),
    }
}

/// SQLite-backed ledger.
pub struct SqliteLedger;

impl Ledger for SqliteLedger {
    fn find_orders_by_normalized_invoice(
        &self,
        conn: &Connection,
        key: &str,
    ) -> Result<Vec<OrderRecord>, DatabaseError> {
        repository::find_orders_by_invoice_key(conn, key)
    }

    fn get_order(&self, conn: &Connection, id: i64) -> Result<Option<OrderRecord>, DatabaseError> {
        repository::get_order(conn, id)
    }

    fn set_slip_link(
        &self,
        conn: &Connection,
        order_id: i64,
        locator: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<(), DatabaseError> {
        repository::set_slip_link(conn, order_id, locator, due_date)
    }

    fn set_invoice_link(&self, conn: &Connection, order_id: i64, locator: &str) -> Result<(), DatabaseError> {
        repository::set_invoice_link(conn, order_id, locator)
    }

    fn clear_slip_link(&self, conn: &Connection, order_id: i64) -> Result<(), DatabaseError> {
        repository::clear_slip_link(conn, order_id)
    }

    fn clear_invoice_link(&self, conn: &Connection, order_id: i64) -> Result<(), DatabaseError> {
        repository::clear_invoice_link(conn, order_id)
    }

    fn orders_with_links(&self, conn: &Connection) -> Result<Vec<OrderRecord>, DatabaseError> {
        repository::list_orders_with_links(conn)
    }

    fn client_name(&self, conn: &Connection, client_id: i64) -> Result<Option<String>, DatabaseError> {
        repository::get_client_name(conn, client_id)
    }
}

/// SQLite-backed document store.
pub struct SqliteDocumentStore;

impl DocumentStore for SqliteDocumentStore {
    fn create_document_record(&self, conn: &Connection, record: &DocumentRecord) -> Result<(), DatabaseError> {
        repository::insert_document_record(conn, record)
    }

    fn find_document_by_locator(
        &self,
        conn: &Connection,
        locator: &str,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        repository::find_document_by_locator(conn, locator)
    }

    fn get_document_record(&self, conn: &Connection, id: &Uuid) -> Result<Option<DocumentRecord>, DatabaseError> {
        repository::get_document_record(conn, id)
    }

    fn update_document_record(&self, conn: &Connection, record: &DocumentRecord) -> Result<(), DatabaseError> {
        repository::update_document_record(conn, record)
    }

    fn delete_document_record(&self, conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
        repository::delete_document_record(conn, id)
    }

    fn list_document_records(&self, conn: &Connection) -> Result<Vec<DocumentRecord>, DatabaseError> {
        repository::list_document_records(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::NewOrder;

    #[test]
    fn traits_are_object_safe() {
        fn _assert_ledger(_: &dyn Ledger) {}
        fn _assert_store(_: &dyn DocumentStore) {}
    }

    #[test]
    fn set_link_touches_only_its_kind() {
        let conn = open_memory_database().unwrap();
        let client_id = repository::insert_client(&conn, "A", None).unwrap();
        let order_id = repository::insert_order(
            &conn,
            &NewOrder {
                client_id,
                invoice_number: Some("1000".into()),
                ..NewOrder::default()
            },
        )
        .unwrap();

        set_link(&SqliteLedger, &conn, DocumentKind::Invoice, order_id, "invoices/a.pdf", None).unwrap();
        set_link(&SqliteLedger, &conn, DocumentKind::PaymentSlip, order_id, "slips/a.pdf", None).unwrap();
        clear_link(&SqliteLedger, &conn, DocumentKind::PaymentSlip, order_id).unwrap();

        let order = SqliteLedger.get_order(&conn, order_id).unwrap().unwrap();
        assert_eq!(order.invoice_path.as_deref(), Some("invoices/a.pdf"));
        assert_eq!(order.payment_slip_path, None);
    }
}
