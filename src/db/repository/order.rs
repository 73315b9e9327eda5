//! Ledger tables: clients and sales orders.
//!
//! Orders carry an `invoice_key` column (canonical invoice number) kept in
//! step with `invoice_number` by every write here, so candidate lookups can
//! prefilter in SQL.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::*;
use crate::pipeline::normalize::{canonical_keys_match, normalize_invoice_number};

const ORDER_COLUMNS: &str = "o.id, o.client_id, c.name, o.invoice_number, o.counterparty_flag,
     o.payment_slip_path, o.invoice_path, o.due_date";

/// Internal row struct for order queries
struct OrderRow {
    id: i64,
    client_id: i64,
    client_name: Option<String>,
    invoice_number: Option<String>,
    counterparty_flag: Option<String>,
    payment_slip_path: Option<String>,
    invoice_path: Option<String>,
    due_date: Option<String>,
}

fn read_order_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        client_name: row.get(2)?,
        invoice_number: row.get(3)?,
        counterparty_flag: row.get(4)?,
        payment_slip_path: row.get(5)?,
        invoice_path: row.get(6)?,
        due_date: row.get(7)?,
    })
}

fn order_from_row(row: OrderRow) -> OrderRecord {
    OrderRecord {
        id: row.id,
        client_id: row.client_id,
        client_name: row.client_name,
        invoice_number: row.invoice_number,
        counterparty_flag: row.counterparty_flag,
        payment_slip_path: row.payment_slip_path,
        invoice_path: row.invoice_path,
        due_date: row
            .due_date
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
    }
}

fn invoice_key(invoice_number: Option<&str>) -> String {
    invoice_number.map(normalize_invoice_number).unwrap_or_default()
}

// ── Clients ─────────────────────────────────────────────────

pub fn insert_client(
    conn: &Connection,
    name: &str,
    tax_id: Option<&str>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO clients (name, tax_id) VALUES (?1, ?2)",
        params![name, tax_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_client(conn: &Connection, id: i64) -> Result<Option<ClientRecord>, DatabaseError> {
    let client = conn
        .query_row(
            "SELECT id, name FROM clients WHERE id = ?1",
            params![id],
            |row| {
                Ok(ClientRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(client)
}

pub fn get_client_name(conn: &Connection, id: i64) -> Result<Option<String>, DatabaseError> {
    Ok(get_client(conn, id)?.map(|c| c.name))
}

// ── Orders ──────────────────────────────────────────────────

pub fn insert_order(conn: &Connection, order: &NewOrder) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO orders (client_id, invoice_number, invoice_key, counterparty_flag, due_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            order.client_id,
            order.invoice_number,
            invoice_key(order.invoice_number.as_deref()),
            order.counterparty_flag,
            order.due_date.map(|d| d.to_string()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_order(conn: &Connection, id: i64) -> Result<Option<OrderRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {ORDER_COLUMNS} FROM orders o LEFT JOIN clients c ON c.id = o.client_id
         WHERE o.id = ?1"
    );
    let row = conn.query_row(&sql, params![id], read_order_row).optional()?;
    Ok(row.map(order_from_row))
}

pub fn order_exists(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM orders WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn update_order_invoice_number(
    conn: &Connection,
    id: i64,
    invoice_number: Option<&str>,
) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE orders SET invoice_number = ?2, invoice_key = ?3 WHERE id = ?1",
        params![id, invoice_number, invoice_key(invoice_number)],
    )?;
    if rows == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

pub fn delete_order(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    let rows = conn.execute("DELETE FROM orders WHERE id = ?1", params![id])?;
    if rows == 0 {
        return Err(not_found(id));
    }
    Ok(())
}

/// Orders whose invoice number matches the canonical `key`, ordered by id.
///
/// SQL narrows to keys that are a prefix of, or prefixed by, `key`; the
/// suffix-length rule is applied in Rust.
pub fn find_orders_by_invoice_key(
    conn: &Connection,
    key: &str,
) -> Result<Vec<OrderRecord>, DatabaseError> {
    if key.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {ORDER_COLUMNS}, o.invoice_key FROM orders o LEFT JOIN clients c ON c.id = o.client_id
         WHERE o.invoice_key <> ''
           AND (o.invoice_key LIKE ?1 || '%' OR ?1 LIKE o.invoice_key || '%')
         ORDER BY o.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![key], |row| {
        Ok((read_order_row(row)?, row.get::<_, String>(8)?))
    })?;

    let mut orders = Vec::new();
    for row in rows {
        let (order, stored_key) = row?;
        if canonical_keys_match(key, &stored_key) {
            orders.push(order_from_row(order));
        }
    }
    Ok(orders)
}

/// Orders holding at least one document path, ordered by id.
pub fn list_orders_with_links(conn: &Connection) -> Result<Vec<OrderRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {ORDER_COLUMNS} FROM orders o LEFT JOIN clients c ON c.id = o.client_id
         WHERE COALESCE(o.payment_slip_path, '') <> '' OR COALESCE(o.invoice_path, '') <> ''
         ORDER BY o.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], read_order_row)?;
    let mut orders = Vec::new();
    for row in rows {
        orders.push(order_from_row(row?));
    }
    Ok(orders)
}

/// Attach a payment slip. `due_date` overwrites only when given.
pub fn set_slip_link(
    conn: &Connection,
    order_id: i64,
    locator: &str,
    due_date: Option<NaiveDate>,
) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE orders SET payment_slip_path = ?2, due_date = COALESCE(?3, due_date) WHERE id = ?1",
        params![order_id, locator, due_date.map(|d| d.to_string())],
    )?;
    if rows == 0 {
        return Err(not_found(order_id));
    }
    Ok(())
}

pub fn set_invoice_link(conn: &Connection, order_id: i64, locator: &str) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE orders SET invoice_path = ?2 WHERE id = ?1",
        params![order_id, locator],
    )?;
    if rows == 0 {
        return Err(not_found(order_id));
    }
    Ok(())
}

pub fn clear_slip_link(conn: &Connection, order_id: i64) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE orders SET payment_slip_path = NULL WHERE id = ?1",
        params![order_id],
    )?;
    if rows == 0 {
        return Err(not_found(order_id));
    }
    Ok(())
}

pub fn clear_invoice_link(conn: &Connection, order_id: i64) -> Result<(), DatabaseError> {
    let rows = conn.execute(
        "UPDATE orders SET invoice_path = NULL WHERE id = ?1",
        params![order_id],
    )?;
    if rows == 0 {
        return Err(not_found(order_id));
    }
    Ok(())
}

/// Clear every order path equal to `locator`. Returns the number of paths cleared.
pub fn clear_links_to_locator(conn: &Connection, locator: &str) -> Result<usize, DatabaseError> {
    let slips = conn.execute(
        "UPDATE orders SET payment_slip_path = NULL WHERE payment_slip_path = ?1",
        params![locator],
    )?;
    let invoices = conn.execute(
        "UPDATE orders SET invoice_path = NULL WHERE invoice_path = ?1",
        params![locator],
    )?;
    Ok(slips + invoices)
}

fn not_found(id: i64) -> DatabaseError {
    DatabaseError::NotFound {
        entity_type: "Order".into(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn seed(conn: &Connection, client: &str, invoice: &str) -> i64 {
        let client_id = insert_client(conn, client, None).unwrap();
        insert_order(
            conn,
            &NewOrder {
                client_id,
                invoice_number: Some(invoice.into()),
                ..NewOrder::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn insert_and_get_order() {
        let conn = open_memory_database().unwrap();
        let id = seed(&conn, "Mercado X", "NF 012244");
        let order = get_order(&conn, id).unwrap().unwrap();
        assert_eq!(order.client_name.as_deref(), Some("Mercado X"));
        assert_eq!(order.invoice_number.as_deref(), Some("NF 012244"));
        assert_eq!(order.payment_slip_path, None);
    }

    #[test]
    fn missing_order_is_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_order(&conn, 99).unwrap().is_none());
        assert!(!order_exists(&conn, 99).unwrap());
    }

    #[test]
    fn finds_by_canonical_key_and_suffix() {
        let conn = open_memory_database().unwrap();
        let exact = seed(&conn, "A", "12263");
        let installment = seed(&conn, "A", "1226301");
        let _unrelated = seed(&conn, "B", "1226399999");
        let _other = seed(&conn, "C", "99");

        let found: Vec<i64> = find_orders_by_invoice_key(&conn, "12263")
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(found, vec![exact, installment]);
    }

    #[test]
    fn empty_key_finds_nothing() {
        let conn = open_memory_database().unwrap();
        let client_id = insert_client(&conn, "A", None).unwrap();
        insert_order(&conn, &NewOrder { client_id, ..NewOrder::default() }).unwrap();
        assert!(find_orders_by_invoice_key(&conn, "").unwrap().is_empty());
    }

    #[test]
    fn invoice_key_follows_updates() {
        let conn = open_memory_database().unwrap();
        let id = seed(&conn, "A", "500");
        update_order_invoice_number(&conn, id, Some("0777")).unwrap();
        assert!(find_orders_by_invoice_key(&conn, "500").unwrap().is_empty());
        assert_eq!(find_orders_by_invoice_key(&conn, "777").unwrap().len(), 1);
    }

    #[test]
    fn slip_link_sets_due_date_only_when_given() {
        let conn = open_memory_database().unwrap();
        let id = seed(&conn, "A", "500");
        let due = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        set_slip_link(&conn, id, "slips/a.pdf", Some(due)).unwrap();
        set_slip_link(&conn, id, "slips/b.pdf", None).unwrap();
        let order = get_order(&conn, id).unwrap().unwrap();
        assert_eq!(order.payment_slip_path.as_deref(), Some("slips/b.pdf"));
        assert_eq!(order.due_date, Some(due));
        assert_eq!(order.invoice_path, None);
    }

    #[test]
    fn link_writes_to_missing_order_fail() {
        let conn = open_memory_database().unwrap();
        assert!(matches!(
            set_invoice_link(&conn, 42, "invoices/x.pdf"),
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(matches!(clear_slip_link(&conn, 42), Err(DatabaseError::NotFound { .. })));
    }

    #[test]
    fn lists_only_linked_orders() {
        let conn = open_memory_database().unwrap();
        let a = seed(&conn, "A", "1000");
        let _b = seed(&conn, "B", "2000");
        set_invoice_link(&conn, a, "invoices/a.pdf").unwrap();
        let linked = list_orders_with_links(&conn).unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, a);
    }

    #[test]
    fn clears_paths_by_locator() {
        let conn = open_memory_database().unwrap();
        let a = seed(&conn, "A", "1000");
        set_invoice_link(&conn, a, "invoices/a.pdf").unwrap();
        set_slip_link(&conn, a, "slips/a.pdf", None).unwrap();
        assert_eq!(clear_links_to_locator(&conn, "invoices/a.pdf").unwrap(), 1);
        let order = get_order(&conn, a).unwrap().unwrap();
        assert_eq!(order.invoice_path, None);
        assert_eq!(order.payment_slip_path.as_deref(), Some("slips/a.pdf"));
    }

    #[test]
    fn client_name_lookup() {
        let conn = open_memory_database().unwrap();
        let id = insert_client(&conn, "Emporio Central", Some("22333444000155")).unwrap();
        assert_eq!(get_client_name(&conn, id).unwrap().as_deref(), Some("Emporio Central"));
        assert_eq!(get_client_name(&conn, id + 1).unwrap(), None);
    }
}
