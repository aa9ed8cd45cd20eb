// db/receipts.rs
// Receipt rows: the sealed, terminal record of each invocation

use rusqlite::{Connection, OptionalExtension, params};

use super::types::ReceiptRow;

/// Parse a ReceiptRow with standard column order:
/// (call_id, tool_name, status, result, effects, created_at)
pub fn parse_receipt_row(row: &rusqlite::Row) -> rusqlite::Result<ReceiptRow> {
    Ok(ReceiptRow {
        call_id: row.get(0)?,
        tool_name: row.get(1)?,
        status: row.get(2)?,
        result: row.get(3)?,
        effects: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const RECEIPT_COLUMNS: &str = "call_id, tool_name, status, result, effects, created_at";

/// Insert the receipt for a call.
///
/// The UNIQUE constraint on `call_id` is the cornerstone invariant: a second
/// insert for the same call is a constraint violation, never a silent
/// overwrite.
pub fn insert_receipt_sync(
    conn: &Connection,
    call_id: &str,
    tool_name: &str,
    status: &str,
    result_json: &str,
    effects_json: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO receipts (call_id, tool_name, status, result, effects)
         VALUES (?, ?, ?, ?, ?)",
        params![call_id, tool_name, status, result_json, effects_json],
    )?;
    Ok(())
}

/// Insert a receipt unless one already exists for the call.
///
/// Returns true when this call inserted the row. The sweeper uses this:
/// losing the race means the worker finished after all, and the reclaim
/// must be abandoned.
pub fn insert_receipt_if_absent_sync(
    conn: &Connection,
    call_id: &str,
    tool_name: &str,
    status: &str,
    result_json: &str,
    effects_json: &str,
) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT INTO receipts (call_id, tool_name, status, result, effects)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(call_id) DO NOTHING",
        params![call_id, tool_name, status, result_json, effects_json],
    )?;
    Ok(n == 1)
}

/// Fetch the receipt for a call, if sealed.
pub fn get_receipt_sync(conn: &Connection, call_id: &str) -> rusqlite::Result<Option<ReceiptRow>> {
    let sql = format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE call_id = ?");
    conn.query_row(&sql, [call_id], parse_receipt_row).optional()
}

/// Fetch receipts for a set of calls (receipt-wait polling).
pub fn get_receipts_for_calls_sync(
    conn: &Connection,
    call_ids: &[String],
) -> rusqlite::Result<Vec<ReceiptRow>> {
    let mut out = Vec::new();
    let sql = format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE call_id = ?");
    let mut stmt = conn.prepare(&sql)?;
    for call_id in call_ids {
        if let Some(receipt) = stmt.query_row([call_id], parse_receipt_row).optional()? {
            out.push(receipt);
        }
    }
    Ok(out)
}

/// Any prior receipt attached to an invocation carrying this idempotency
/// key (safe-retry dedup: the verdict is reused whatever it was).
pub fn find_by_idempotency_key_sync(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<ReceiptRow>> {
    conn.query_row(
        "SELECT r.call_id, r.tool_name, r.status, r.result, r.effects, r.created_at
         FROM receipts r
         JOIN invocations i ON i.call_id = r.call_id
         WHERE i.idempotency_key = ?
         ORDER BY r.id
         LIMIT 1",
        [key],
        parse_receipt_row,
    )
    .optional()
}

/// Prior *succeeded* receipt for the same tool whose input carries the same
/// key-field value (keyed dedup). Failed attempts do not block a retry.
pub fn find_keyed_receipt_sync(
    conn: &Connection,
    tool_name: &str,
    key_field: &str,
    key_value: &str,
) -> rusqlite::Result<Option<ReceiptRow>> {
    let path = format!("$.{key_field}");
    conn.query_row(
        "SELECT r.call_id, r.tool_name, r.status, r.result, r.effects, r.created_at
         FROM receipts r
         JOIN invocations i ON i.call_id = r.call_id
         WHERE i.tool_name = ?
           AND r.status = 'succeeded'
           AND json_extract(i.input, ?) = ?
         ORDER BY r.id
         LIMIT 1",
        params![tool_name, path, key_value],
        parse_receipt_row,
    )
    .optional()
}

/// Receipt count, for the health probe.
pub fn receipt_count_sync(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM receipts", [], |row| row.get(0))
}
