// db/types.rs
// Data structures returned by database operations

use strum::{Display, EnumString};

/// Queue row lifecycle. Transitions are one-way:
/// `queued → running → succeeded | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum InvocationStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// One row of the invocation queue.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub call_id: String,
    pub tool_name: String,
    /// Raw JSON payload as stored
    pub input: String,
    pub status: InvocationStatus,
    pub idempotency_key: Option<String>,
    pub worker_id: Option<String>,
    pub claimed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub error: Option<String>,
}

/// One sealed receipt row.
#[derive(Debug, Clone)]
pub struct ReceiptRow {
    pub call_id: String,
    pub tool_name: String,
    /// succeeded | failed | not_configured
    pub status: String,
    /// Raw JSON as stored
    pub result: String,
    pub effects: String,
    pub created_at: String,
}

/// A `running` row that may have outlived its worker.
#[derive(Debug, Clone)]
pub struct StaleCandidate {
    pub call_id: String,
    pub tool_name: String,
    pub worker_id: Option<String>,
    pub age_seconds: i64,
}
