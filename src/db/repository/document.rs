use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::DocumentKind;
use crate::models::*;

const DOCUMENT_COLUMNS: &str = "id, storage_locator, kind, fields_json, cached_invoice_number,
     linked_order_id, owner_user_id, processed_at";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Internal row struct for document record queries
struct DocumentRow {
    id: String,
    storage_locator: String,
    kind: String,
    fields_json: String,
    cached_invoice_number: Option<String>,
    linked_order_id: Option<i64>,
    owner_user_id: Option<i64>,
    processed_at: String,
}

fn read_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        storage_locator: row.get(1)?,
        kind: row.get(2)?,
        fields_json: row.get(3)?,
        cached_invoice_number: row.get(4)?,
        linked_order_id: row.get(5)?,
        owner_user_id: row.get(6)?,
        processed_at: row.get(7)?,
    })
}

fn document_from_row(row: DocumentRow) -> Result<DocumentRecord, DatabaseError> {
    Ok(DocumentRecord {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        storage_locator: row.storage_locator,
        kind: DocumentKind::from_str(&row.kind)?,
        fields: serde_json::from_str(&row.fields_json)?,
        cached_invoice_number: row.cached_invoice_number,
        linked_order_id: row.linked_order_id,
        owner_user_id: row.owner_user_id,
        processed_at: NaiveDateTime::parse_from_str(&row.processed_at, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(&row.processed_at, "%Y-%m-%d %H:%M:%S"))
            .unwrap_or_default(),
    })
}

fn query_documents(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<DocumentRecord>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, read_document_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(document_from_row(row?)?);
    }
    Ok(records)
}

pub fn insert_document_record(conn: &Connection, record: &DocumentRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO documents (id, storage_locator, kind, fields_json, cached_invoice_number,
         linked_order_id, owner_user_id, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id.to_string(),
            record.storage_locator,
            record.kind.as_str(),
            serde_json::to_string(&record.fields)?,
            record.cached_invoice_number,
            record.linked_order_id,
            record.owner_user_id,
            record.processed_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DatabaseError::ConstraintViolation(format!(
                "document record already exists for {}",
                record.storage_locator
            ))
        }
        other => other.into(),
    })?;
    Ok(())
}

pub fn get_document_record(conn: &Connection, id: &Uuid) -> Result<Option<DocumentRecord>, DatabaseError> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], read_document_row)
        .optional()?;
    row.map(document_from_row).transpose()
}

pub fn find_document_by_locator(
    conn: &Connection,
    locator: &str,
) -> Result<Option<DocumentRecord>, DatabaseError> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE storage_locator = ?1");
    let row = conn
        .query_row(&sql, params![locator], read_document_row)
        .optional()?;
    row.map(document_from_row).transpose()
}

pub fn update_document_record(conn: &Connection, record: &DocumentRecord) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET storage_locator = ?2, kind = ?3, fields_json = ?4,
         cached_invoice_number = ?5, linked_order_id = ?6, owner_user_id = ?7, processed_at = ?8
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.storage_locator,
            record.kind.as_str(),
            serde_json::to_string(&record.fields)?,
            record.cached_invoice_number,
            record.linked_order_id,
            record.owner_user_id,
            record.processed_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )?;
    if rows == 0 {
        return Err(not_found(&record.id));
    }
    Ok(())
}

pub fn delete_document_record(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])?;
    if rows == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

/// Every record, ordered by locator.
pub fn list_document_records(conn: &Connection) -> Result<Vec<DocumentRecord>, DatabaseError> {
    let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY storage_locator");
    query_documents(conn, &sql, [])
}

/// Records with no linked order, ordered by locator.
pub fn list_unlinked_records(conn: &Connection) -> Result<Vec<DocumentRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE linked_order_id IS NULL
         ORDER BY storage_locator"
    );
    query_documents(conn, &sql, [])
}

/// Records pointing at a given order.
pub fn list_records_linked_to(conn: &Connection, order_id: i64) -> Result<Vec<DocumentRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE linked_order_id = ?1
         ORDER BY storage_locator"
    );
    query_documents(conn, &sql, params![order_id])
}

fn not_found(id: &Uuid) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "DocumentRecord".into(),
        id: id.to_string(),
    }
}
