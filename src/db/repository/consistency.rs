use rusqlite::Connection;
use serde::Serialize;

use super::document::{delete_document_record, find_document_by_locator, list_document_records, update_document_record};
use super::order::{clear_invoice_link, clear_links_to_locator, clear_slip_link, list_orders_with_links, order_exists};
use crate::db::DatabaseError;
use crate::models::enums::DocumentKind;
use crate::pipeline::intake::storage::BlobStore;

/// Counts from one consistency sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub documents_checked: usize,
    pub orders_checked: usize,
    /// Records whose blob no longer exists, deleted.
    pub ghost_documents_removed: usize,
    /// Order paths cleared because they referenced a ghost.
    pub ghost_paths_cleared: usize,
    /// Order paths cleared because no record exists for the locator.
    pub broken_paths_cleared: usize,
    /// Records whose linked order no longer exists, unlinked.
    pub orphan_links_cleared: usize,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.ghost_documents_removed == 0
            && self.ghost_paths_cleared == 0
            && self.broken_paths_cleared == 0
            && self.orphan_links_cleared == 0
    }
}

/// Repair links between documents, blobs and orders in one transaction.
///
/// 1. Records whose blob is missing are deleted, with any order path to them.
/// 2. Order paths naming a locator that has no record are cleared.
/// 3. Records linked to a missing order are unlinked.
pub fn sweep_broken_links(conn: &Connection, blobs: &dyn BlobStore) -> Result<SweepReport, DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    let mut report = SweepReport::default();

    // 1. Ghost documents
    let records = list_document_records(&tx)?;
    report.documents_checked = records.len();
    let mut live = Vec::with_capacity(records.len());
    for record in records {
        if blobs.file_exists(&record.storage_locator) {
            live.push(record);
            continue;
        }
        report.ghost_paths_cleared += clear_links_to_locator(&tx, &record.storage_locator)?;
        delete_document_record(&tx, &record.id)?;
        report.ghost_documents_removed += 1;
        tracing::warn!(
            document_id = %record.id,
            locator = %record.storage_locator,
            "Removed ghost document record"
        );
    }

    // 2. Order paths without a record
    let orders = list_orders_with_links(&tx)?;
    report.orders_checked = orders.len();
    for order in &orders {
        for kind in [DocumentKind::PaymentSlip, DocumentKind::Invoice] {
            let Some(path) = order.path_for(kind) else {
                continue;
            };
            if find_document_by_locator(&tx, path)?.is_some() {
                continue;
            }
            match kind {
                DocumentKind::PaymentSlip => clear_slip_link(&tx, order.id)?,
                DocumentKind::Invoice => clear_invoice_link(&tx, order.id)?,
            }
            report.broken_paths_cleared += 1;
            tracing::warn!(order_id = order.id, kind = kind.as_str(), path, "Cleared broken order path");
        }
    }

    // 3. Orphaned links
    for mut record in live {
        let Some(order_id) = record.linked_order_id else {
            continue;
        };
        if order_exists(&tx, order_id)? {
            continue;
        }
        record.linked_order_id = None;
        update_document_record(&tx, &record)?;
        report.orphan_links_cleared += 1;
        tracing::warn!(document_id = %record.id, order_id, "Cleared link to missing order");
    }

    tx.commit()?;

    tracing::info!(
        documents = report.documents_checked,
        orders = report.orders_checked,
        ghosts = report.ghost_documents_removed,
        broken_paths = report.broken_paths_cleared,
        orphans = report.orphan_links_cleared,
        "Consistency sweep complete"
    );
    Ok(report)
}
