// db/domain.rs
// CRM domain tables owned by the handler modules

use rusqlite::{Connection, OptionalExtension, params};

/// Lead row. The column is named `status`; the external tool API calls the
/// same field `stage`, and handlers map between the two at this boundary.
#[derive(Debug, Clone)]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub suburb: String,
    pub source: String,
    pub status: String,
    pub created_at: String,
}

pub fn parse_lead_row(row: &rusqlite::Row) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        suburb: row.get(3)?,
        source: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const LEAD_COLUMNS: &str = "id, name, phone, suburb, source, status, created_at";

pub fn insert_lead_sync(
    conn: &Connection,
    id: &str,
    name: &str,
    phone: &str,
    suburb: &str,
    source: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO leads (id, name, phone, suburb, source) VALUES (?, ?, ?, ?, ?)",
        params![id, name, phone, suburb, source],
    )?;
    Ok(())
}

pub fn get_lead_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<Lead>> {
    let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?");
    conn.query_row(&sql, [id], parse_lead_row).optional()
}

pub fn get_lead_by_phone_sync(conn: &Connection, phone: &str) -> rusqlite::Result<Option<Lead>> {
    let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE phone = ?");
    conn.query_row(&sql, [phone], parse_lead_row).optional()
}

/// Find leads by exact phone or case-insensitive name fragment.
pub fn find_leads_sync(conn: &Connection, query: &str, limit: usize) -> rusqlite::Result<Vec<Lead>> {
    let sql = format!(
        "SELECT {LEAD_COLUMNS} FROM leads
         WHERE phone = ?1 OR name LIKE '%' || ?1 || '%' COLLATE NOCASE
         ORDER BY created_at DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![query, limit as i64], parse_lead_row)?;
    rows.collect()
}

/// Returns the number of rows updated (0 when the lead does not exist).
pub fn update_lead_status_sync(
    conn: &Connection,
    lead_id: &str,
    status: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE leads SET status = ?, updated_at = datetime('now') WHERE id = ?",
        params![status, lead_id],
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Inspections
// ═══════════════════════════════════════════════════════════════════════════════

pub fn insert_inspection_sync(
    conn: &Connection,
    id: &str,
    lead_id: &str,
    scheduled_for: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO inspections (id, lead_id, scheduled_for) VALUES (?, ?, ?)",
        params![id, lead_id, scheduled_for],
    )?;
    Ok(())
}

pub fn get_inspection_status_sync(
    conn: &Connection,
    inspection_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT status FROM inspections WHERE id = ?",
        [inspection_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn complete_inspection_sync(
    conn: &Connection,
    inspection_id: &str,
    findings: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE inspections SET status = 'completed', findings = ? WHERE id = ? AND status = 'booked'",
        params![findings, inspection_id],
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Quotes
// ═══════════════════════════════════════════════════════════════════════════════

pub fn insert_quote_sync(
    conn: &Connection,
    id: &str,
    lead_id: &str,
    amount_cents: i64,
    description: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO quotes (id, lead_id, amount_cents, description) VALUES (?, ?, ?, ?)",
        params![id, lead_id, amount_cents, description],
    )?;
    Ok(())
}

pub fn quote_exists_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM quotes WHERE id = ?", [id], |_| Ok(true))
        .optional()
        .map(|found| found.unwrap_or(false))
}

pub fn get_quote_status_sync(conn: &Connection, quote_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT status FROM quotes WHERE id = ?", [quote_id], |row| {
        row.get(0)
    })
    .optional()
}

pub fn accept_quote_sync(conn: &Connection, quote_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE quotes SET status = 'accepted', updated_at = datetime('now')
         WHERE id = ? AND status IN ('draft', 'sent')",
        [quote_id],
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Jobs
// ═══════════════════════════════════════════════════════════════════════════════

pub fn insert_job_sync(
    conn: &Connection,
    id: &str,
    quote_id: &str,
    scheduled_for: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO jobs (id, quote_id, scheduled_for) VALUES (?, ?, ?)",
        params![id, quote_id, scheduled_for],
    )?;
    Ok(())
}

pub fn job_exists_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM jobs WHERE id = ?", [id], |_| Ok(true))
        .optional()
        .map(|found| found.unwrap_or(false))
}

pub fn get_job_status_sync(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT status FROM jobs WHERE id = ?", [job_id], |row| {
        row.get(0)
    })
    .optional()
}

pub fn complete_job_sync(conn: &Connection, job_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE jobs SET status = 'completed', completed_at = datetime('now')
         WHERE id = ? AND status IN ('scheduled', 'in_progress')",
        [job_id],
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Invoices
// ═══════════════════════════════════════════════════════════════════════════════

pub fn insert_invoice_sync(
    conn: &Connection,
    id: &str,
    job_id: &str,
    amount_cents: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO invoices (id, job_id, amount_cents) VALUES (?, ?, ?)",
        params![id, job_id, amount_cents],
    )?;
    Ok(())
}

pub fn get_invoice_id_by_job_sync(conn: &Connection, job_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT id FROM invoices WHERE job_id = ?", [job_id], |row| {
        row.get(0)
    })
    .optional()
}

pub fn get_invoice_status_sync(
    conn: &Connection,
    invoice_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT status FROM invoices WHERE id = ?",
        [invoice_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn mark_invoice_paid_sync(conn: &Connection, invoice_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE invoices SET status = 'paid', paid_at = datetime('now')
         WHERE id = ? AND status = 'issued'",
        [invoice_id],
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Comms log
// ═══════════════════════════════════════════════════════════════════════════════

#[allow(clippy::too_many_arguments)]
pub fn insert_comms_log_sync(
    conn: &Connection,
    id: &str,
    lead_id: Option<&str>,
    channel: &str,
    direction: &str,
    to_number: Option<&str>,
    body: &str,
    provider_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO comms_log (id, lead_id, channel, direction, to_number, body, provider_id)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![id, lead_id, channel, direction, to_number, body, provider_id],
    )?;
    Ok(())
}
