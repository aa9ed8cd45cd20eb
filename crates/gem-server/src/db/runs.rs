// db/runs.rs
// Router run audit records

use rusqlite::{Connection, OptionalExtension, params};

/// Audit record of one Router run, written once when the run completes.
#[derive(Debug, Clone)]
pub struct RouterRun {
    pub run_id: String,
    pub message: String,
    pub mode: String,
    pub decision: Option<String>,
    /// JSON array of planned calls
    pub planned: String,
    /// JSON array of call ids
    pub enqueued: String,
    /// JSON array of observed receipts
    pub receipts: String,
    pub status: String,
    /// JSON array of strings
    pub errors: String,
    pub created_at: String,
}

pub fn insert_run_sync(conn: &Connection, run: &RouterRun) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO router_runs (run_id, message, mode, decision, planned, enqueued, receipts, status, errors)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            run.run_id,
            run.message,
            run.mode,
            run.decision,
            run.planned,
            run.enqueued,
            run.receipts,
            run.status,
            run.errors,
        ],
    )?;
    Ok(())
}

pub fn get_run_sync(conn: &Connection, run_id: &str) -> rusqlite::Result<Option<RouterRun>> {
    conn.query_row(
        "SELECT run_id, message, mode, decision, planned, enqueued, receipts, status, errors, created_at
         FROM router_runs WHERE run_id = ?",
        [run_id],
        |row| {
            Ok(RouterRun {
                run_id: row.get(0)?,
                message: row.get(1)?,
                mode: row.get(2)?,
                decision: row.get(3)?,
                planned: row.get(4)?,
                enqueued: row.get(5)?,
                receipts: row.get(6)?,
                status: row.get(7)?,
                errors: row.get(8)?,
                created_at: row.get(9)?,
            })
        },
    )
    .optional()
}
