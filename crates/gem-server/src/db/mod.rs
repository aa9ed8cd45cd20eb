// db/mod.rs
// Store layer: pooled SQLite with synchronous query functions
//
// Ownership boundaries (enforced by which module calls what):
// - the Router writes `invocations` and `router_runs`, nothing else
// - the Worker transitions queue rows and is the sole writer of `receipts`
// - handlers own the domain tables via the functions in `domain`

mod domain;
mod migration_helpers;
pub mod pool;
mod queue;
mod receipts;
mod runs;
pub mod schema;
mod types;

pub use domain::{
    Lead, accept_quote_sync, complete_inspection_sync, complete_job_sync, find_leads_sync,
    get_inspection_status_sync, get_invoice_id_by_job_sync, get_invoice_status_sync,
    get_job_status_sync, get_lead_by_phone_sync, get_lead_sync, get_quote_status_sync,
    insert_comms_log_sync, insert_inspection_sync, insert_invoice_sync, insert_job_sync,
    insert_lead_sync, insert_quote_sync, job_exists_sync, mark_invoice_paid_sync, parse_lead_row,
    quote_exists_sync, update_lead_status_sync,
};
pub use pool::DatabasePool;
pub use queue::{
    claim_next_sync, enqueue_sync, finish_sync, get_by_idempotency_key_sync, get_invocation_sync,
    parse_invocation_row, queue_counts_sync, stale_candidates_sync,
};
pub use receipts::{
    find_by_idempotency_key_sync, find_keyed_receipt_sync, get_receipt_sync,
    get_receipts_for_calls_sync, insert_receipt_if_absent_sync, insert_receipt_sync,
    parse_receipt_row, receipt_count_sync,
};
pub use runs::{RouterRun, get_run_sync, insert_run_sync};
pub use types::{Invocation, InvocationStatus, ReceiptRow, StaleCandidate};

/// Check whether a rusqlite error is a UNIQUE constraint violation.
///
/// Keyed creates and webhook dedup both lean on this: the second writer in
/// a race loses the insert and must treat the existing row as its result.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::ConstraintViolation,
                extended_code: ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY,
            },
            _,
        )
    )
}
