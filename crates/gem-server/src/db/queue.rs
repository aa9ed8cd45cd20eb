// db/queue.rs
// Invocation queue operations: enqueue, atomic claim, terminal transitions

use rusqlite::{Connection, OptionalExtension, params};
use std::str::FromStr;

use super::types::{Invocation, InvocationStatus, StaleCandidate};

/// Parse an Invocation from a rusqlite Row with standard column order:
/// (call_id, tool_name, input, status, idempotency_key, worker_id,
///  claimed_at, created_at, updated_at, error)
pub fn parse_invocation_row(row: &rusqlite::Row) -> rusqlite::Result<Invocation> {
    let status_str: String = row.get(3)?;
    let status = InvocationStatus::from_str(&status_str).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown invocation status: {status_str}").into(),
        )
    })?;
    Ok(Invocation {
        call_id: row.get(0)?,
        tool_name: row.get(1)?,
        input: row.get(2)?,
        status,
        idempotency_key: row.get(4)?,
        worker_id: row.get(5)?,
        claimed_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        error: row.get(9)?,
    })
}

const INVOCATION_COLUMNS: &str = "call_id, tool_name, input, status, idempotency_key, \
     worker_id, claimed_at, created_at, updated_at, error";

/// Insert a new queued invocation.
///
/// A duplicate `idempotency_key` violates the filtered unique index; callers
/// that care (webhook ingress) detect it with [`super::is_unique_violation`].
pub fn enqueue_sync(
    conn: &Connection,
    call_id: &str,
    tool_name: &str,
    input_json: &str,
    idempotency_key: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO invocations (call_id, tool_name, input, status, idempotency_key)
         VALUES (?, ?, ?, 'queued', ?)",
        params![call_id, tool_name, input_json, idempotency_key],
    )?;
    Ok(())
}

/// Atomically claim the oldest queued invocation for `worker_id`.
///
/// Single statement, single round-trip: the subquery picks the oldest
/// `queued` row, the UPDATE transitions it to `running` and stamps the
/// worker, and RETURNING hands the row back. SQLite serializes writers, so
/// two workers racing this statement always observe disjoint rows; a claimer
/// that hits the writer lock waits inside `busy_timeout` and then sees
/// whatever is left.
pub fn claim_next_sync(conn: &Connection, worker_id: &str) -> rusqlite::Result<Option<Invocation>> {
    let sql = format!(
        "UPDATE invocations
         SET status = 'running',
             worker_id = ?,
             claimed_at = datetime('now'),
             updated_at = datetime('now')
         WHERE call_id = (
             SELECT call_id FROM invocations
             WHERE status = 'queued'
             ORDER BY created_at, rowid
             LIMIT 1
         )
         RETURNING {INVOCATION_COLUMNS}"
    );
    conn.query_row(&sql, [worker_id], parse_invocation_row)
        .optional()
}

/// Transition a `running` row to its terminal status.
///
/// Guarded on `status = 'running'` so a late writer cannot regress a row
/// that already reached a terminal state. Returns false when no transition
/// happened.
pub fn finish_sync(
    conn: &Connection,
    call_id: &str,
    status: InvocationStatus,
    error: Option<&str>,
) -> rusqlite::Result<bool> {
    debug_assert!(matches!(
        status,
        InvocationStatus::Succeeded | InvocationStatus::Failed
    ));
    let n = conn.execute(
        "UPDATE invocations
         SET status = ?, error = ?, updated_at = datetime('now')
         WHERE call_id = ? AND status = 'running'",
        params![status.to_string(), error, call_id],
    )?;
    Ok(n == 1)
}

/// Fetch a single invocation by call id.
pub fn get_invocation_sync(conn: &Connection, call_id: &str) -> rusqlite::Result<Option<Invocation>> {
    let sql = format!("SELECT {INVOCATION_COLUMNS} FROM invocations WHERE call_id = ?");
    conn.query_row(&sql, [call_id], parse_invocation_row)
        .optional()
}

/// Find a queued-or-later invocation carrying the given idempotency key.
pub fn get_by_idempotency_key_sync(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<Invocation>> {
    let sql = format!("SELECT {INVOCATION_COLUMNS} FROM invocations WHERE idempotency_key = ?");
    conn.query_row(&sql, [key], parse_invocation_row).optional()
}

/// All `running` rows with their age, oldest first.
///
/// The sweeper compares each age against the owning tool's staleness bound;
/// the query itself does not know per-tool timeouts.
pub fn stale_candidates_sync(conn: &Connection) -> rusqlite::Result<Vec<StaleCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT call_id, tool_name, worker_id,
                CAST((julianday('now') - julianday(claimed_at)) * 86400 AS INTEGER)
         FROM invocations
         WHERE status = 'running' AND claimed_at IS NOT NULL
         ORDER BY claimed_at",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(StaleCandidate {
            call_id: row.get(0)?,
            tool_name: row.get(1)?,
            worker_id: row.get(2)?,
            age_seconds: row.get(3)?,
        })
    })?;
    rows.collect()
}

/// Queue depth by status, for the health probe.
pub fn queue_counts_sync(conn: &Connection) -> rusqlite::Result<(i64, i64)> {
    let queued: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invocations WHERE status = 'queued'",
        [],
        |row| row.get(0),
    )?;
    let running: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invocations WHERE status = 'running'",
        [],
        |row| row.get(0),
    )?;
    Ok((queued, running))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_all_migrations;

    fn open_migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_claim_empty_queue() {
        let conn = open_migrated();
        assert!(claim_next_sync(&conn, "w1").unwrap().is_none());
    }

    #[test]
    fn test_claim_oldest_first() {
        let conn = open_migrated();
        // Same-second inserts: rowid breaks the tie in insert order
        enqueue_sync(&conn, "c1", "os.health_check", "{}", None).unwrap();
        enqueue_sync(&conn, "c2", "os.health_check", "{}", None).unwrap();

        let first = claim_next_sync(&conn, "w1").unwrap().unwrap();
        assert_eq!(first.call_id, "c1");
        assert_eq!(first.status, InvocationStatus::Running);
        assert_eq!(first.worker_id.as_deref(), Some("w1"));
        assert!(first.claimed_at.is_some());

        let second = claim_next_sync(&conn, "w2").unwrap().unwrap();
        assert_eq!(second.call_id, "c2");

        assert!(claim_next_sync(&conn, "w1").unwrap().is_none());
    }

    #[test]
    fn test_claim_skips_running_rows() {
        let conn = open_migrated();
        enqueue_sync(&conn, "c1", "t", "{}", None).unwrap();
        claim_next_sync(&conn, "w1").unwrap().unwrap();

        // Row is running now; nothing left to claim
        assert!(claim_next_sync(&conn, "w2").unwrap().is_none());
    }

    #[test]
    fn test_finish_is_monotonic() {
        let conn = open_migrated();
        enqueue_sync(&conn, "c1", "t", "{}", None).unwrap();
        claim_next_sync(&conn, "w1").unwrap();

        assert!(finish_sync(&conn, "c1", InvocationStatus::Succeeded, None).unwrap());
        // Terminal rows cannot transition again
        assert!(!finish_sync(&conn, "c1", InvocationStatus::Failed, Some("late")).unwrap());

        let row = get_invocation_sync(&conn, "c1").unwrap().unwrap();
        assert_eq!(row.status, InvocationStatus::Succeeded);
        assert!(row.error.is_none());
    }

    #[test]
    fn test_finish_requires_running() {
        let conn = open_migrated();
        enqueue_sync(&conn, "c1", "t", "{}", None).unwrap();
        // Still queued: finish must refuse
        assert!(!finish_sync(&conn, "c1", InvocationStatus::Failed, None).unwrap());
    }

    #[test]
    fn test_stale_candidates_only_running() {
        let conn = open_migrated();
        enqueue_sync(&conn, "c1", "t", "{}", None).unwrap();
        enqueue_sync(&conn, "c2", "t", "{}", None).unwrap();
        claim_next_sync(&conn, "w1").unwrap();

        let stale = stale_candidates_sync(&conn).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].call_id, "c1");
        assert!(stale[0].age_seconds >= 0);
    }
}
