// db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

use super::migration_helpers::add_column_if_missing;

/// Run all schema setup and migrations.
///
/// Called during database initialization. This function is idempotent -
/// it checks for existing tables/columns before making changes.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    migrate_invocations_error_column(conn)?;

    Ok(())
}

/// Early deployments shipped `invocations` without the error blob.
fn migrate_invocations_error_column(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "invocations", "error", "TEXT")?;
    Ok(())
}

pub const SCHEMA: &str = r#"
-- ═══════════════════════════════════════
-- CORE: Invocation queue
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS invocations (
    call_id TEXT PRIMARY KEY,
    tool_name TEXT NOT NULL,
    input TEXT NOT NULL,                    -- JSON payload
    status TEXT NOT NULL DEFAULT 'queued',  -- queued | running | succeeded | failed
    idempotency_key TEXT,
    worker_id TEXT,
    claimed_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_invocations_status ON invocations(status, created_at);
-- Webhook dedup: duplicate deliveries collapse on this index
CREATE UNIQUE INDEX IF NOT EXISTS idx_invocations_idem_key
    ON invocations(idempotency_key) WHERE idempotency_key IS NOT NULL;

-- ═══════════════════════════════════════
-- CORE: Receipts (one per terminal invocation)
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS receipts (
    id INTEGER PRIMARY KEY,
    call_id TEXT NOT NULL UNIQUE REFERENCES invocations(call_id),
    tool_name TEXT NOT NULL,
    status TEXT NOT NULL,                   -- succeeded | failed | not_configured
    result TEXT NOT NULL,                   -- JSON
    effects TEXT NOT NULL DEFAULT '{}',     -- JSON
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_receipts_tool ON receipts(tool_name, status);

-- ═══════════════════════════════════════
-- CORE: Router run audit
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS router_runs (
    run_id TEXT PRIMARY KEY,
    message TEXT NOT NULL,
    mode TEXT NOT NULL,
    decision TEXT,
    planned TEXT NOT NULL DEFAULT '[]',     -- JSON array of planned calls
    enqueued TEXT NOT NULL DEFAULT '[]',    -- JSON array of call ids
    receipts TEXT NOT NULL DEFAULT '[]',    -- JSON array of observed receipts
    status TEXT NOT NULL DEFAULT 'ok',
    errors TEXT NOT NULL DEFAULT '[]',      -- JSON array of strings
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- ═══════════════════════════════════════
-- DOMAIN: CRM tables owned by the handlers
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS leads (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT NOT NULL UNIQUE,             -- natural key for keyed idempotency
    suburb TEXT NOT NULL,
    source TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',     -- external API calls this "stage"
    notes TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS inspections (
    id TEXT PRIMARY KEY,
    lead_id TEXT NOT NULL REFERENCES leads(id),
    scheduled_for TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'booked',  -- booked | completed | cancelled
    findings TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_inspections_lead ON inspections(lead_id);

CREATE TABLE IF NOT EXISTS quotes (
    id TEXT PRIMARY KEY,
    lead_id TEXT NOT NULL REFERENCES leads(id),
    amount_cents INTEGER NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',   -- draft | sent | accepted | declined
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_quotes_lead ON quotes(lead_id);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    quote_id TEXT NOT NULL REFERENCES quotes(id),
    scheduled_for TEXT,
    status TEXT NOT NULL DEFAULT 'scheduled', -- scheduled | in_progress | completed | cancelled
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_jobs_quote ON jobs(quote_id);

CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL UNIQUE REFERENCES jobs(id), -- one invoice per job
    amount_cents INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'issued',  -- issued | paid | void
    issued_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    paid_at TEXT
);

CREATE TABLE IF NOT EXISTS comms_log (
    id TEXT PRIMARY KEY,
    lead_id TEXT REFERENCES leads(id),
    channel TEXT NOT NULL,                  -- sms | email
    direction TEXT NOT NULL,                -- outbound | inbound
    to_number TEXT,
    body TEXT NOT NULL,
    provider_id TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_comms_lead ON comms_log(lead_id);
"#;
